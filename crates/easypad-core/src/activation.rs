//! Background bring-up of freshly constructed devices.
//!
//! ```text
//! Constructing ──► Initialized ──► Activating ──► Activated
//!      │                               │
//!      └──────────► Failed ◄───────────┘        (any) ──destroy──► Destroyed
//! ```
//!
//! Activation is spawned onto the runtime right after construction and is
//! never joined. Its outcome is written back through the registry lock by
//! the completion callback. `cancel` only signals the token; it does not wait
//! for the task, and it leaves already launched report dispatches alone.

use crate::backend::NativeDevice;
use easypad_protocol::DeviceId;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Constructing,
    Initialized,
    Activating,
    Activated,
    Failed,
    Destroyed,
}

impl Lifecycle {
    /// Constructed and not yet failed or destroyed.
    pub fn is_initialized(self) -> bool {
        matches!(self, Lifecycle::Initialized | Lifecycle::Activating | Lifecycle::Activated)
    }

    pub fn is_active(self) -> bool {
        self == Lifecycle::Activated
    }

    /// No further transition will happen without a caller action.
    pub fn is_settled(self) -> bool {
        matches!(self, Lifecycle::Activated | Lifecycle::Failed | Lifecycle::Destroyed)
    }
}

/// How a background activation ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Activated,
    Failed(String),
}

/// Handle to a spawned activation.
pub(crate) struct Activation {
    token: CancellationToken,
}

impl Activation {
    pub(crate) fn spawn<F>(
        runtime: &Handle,
        id: DeviceId,
        native: Arc<dyn NativeDevice>,
        timeout: Duration,
        on_complete: F,
    ) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let span = tracing::debug_span!("activation", %id);

        runtime.spawn(
            async move {
                let outcome = tokio::select! {
                    _ = cancelled.cancelled() => {
                        debug!("activation cancelled");
                        return;
                    }
                    res = tokio::time::timeout(timeout, native.activate()) => match res {
                        Ok(Ok(())) => Outcome::Activated,
                        Ok(Err(e)) => Outcome::Failed(format!("{e:#}")),
                        Err(_) => Outcome::Failed(format!("timed out after {timeout:?}")),
                    },
                };
                on_complete(outcome);
            }
            .instrument(span),
        );

        Self { token }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
