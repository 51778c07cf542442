use crate::activation::{Activation, Lifecycle};
use crate::backend::NativeDevice;
use crate::error::{Error, IndexKind, Result};
use easypad_protocol::{Axis, Buttons, DeviceId, GamepadState, Report};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace, warn, Instrument};

/// One virtual gamepad: its state, its native handle and its lifecycle.
///
/// Owned exclusively by its registry entry. Every successful mutation sends
/// exactly one report carrying the whole state; dispatch is fire-and-forget
/// and may be dropped by the OS while the device is still activating.
pub struct VirtualDevice {
    id: DeviceId,
    state: GamepadState,
    native: Option<Arc<dyn NativeDevice>>,
    lifecycle: watch::Sender<Lifecycle>,
    activation: Option<Activation>,
    runtime: Handle,
}

impl VirtualDevice {
    pub(crate) fn new(id: DeviceId, native: Arc<dyn NativeDevice>, runtime: Handle) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Initialized);
        Self {
            id,
            state: GamepadState::default(),
            native: Some(native),
            lifecycle,
            activation: None,
            runtime,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn state(&self) -> &GamepadState {
        &self.state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle().is_initialized()
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle().is_active()
    }

    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn button_down(&mut self, index: usize) -> Result<()> {
        self.set_button(index, true)
    }

    pub fn button_up(&mut self, index: usize) -> Result<()> {
        self.set_button(index, false)
    }

    fn set_button(&mut self, index: usize, pressed: bool) -> Result<()> {
        self.ensure_live()?;
        let button = Buttons::from_index(index)
            .ok_or(Error::InvalidIndex { kind: IndexKind::Button, index })?;
        self.state.set_button(button, pressed);
        self.dispatch()
    }

    /// Sticks (0..=3) store `value` verbatim; triggers (4, 5) are remapped to 0..=255.
    pub fn set_axis(&mut self, index: usize, value: i16) -> Result<()> {
        self.ensure_live()?;
        let axis =
            Axis::from_index(index).ok_or(Error::InvalidIndex { kind: IndexKind::Axis, index })?;
        self.state.set_axis(axis, value);
        self.dispatch()
    }

    /// Cancel pending activation and release the native handle. Idempotent.
    ///
    /// Does not wait for the activation task or for dispatches already in
    /// flight; those finish or fail on their own against a released handle.
    pub fn destroy(&mut self) -> bool {
        if let Some(activation) = self.activation.take() {
            activation.cancel();
        }
        let Some(native) = self.native.take() else {
            return false;
        };
        native.teardown();
        self.lifecycle.send_replace(Lifecycle::Destroyed);
        debug!(id = %self.id, "device released");
        true
    }

    pub(crate) fn begin_activation(&mut self, activation: Activation) {
        self.activation = Some(activation);
        self.lifecycle.send_replace(Lifecycle::Activating);
    }

    /// Apply a background activation result unless the device moved on.
    pub(crate) fn finish_activation(&mut self, next: Lifecycle) -> bool {
        let cancelled = self.activation.as_ref().map_or(true, Activation::is_cancelled);
        if cancelled || self.lifecycle() != Lifecycle::Activating {
            return false;
        }
        self.activation = None;
        self.lifecycle.send_replace(next);
        true
    }

    fn ensure_live(&self) -> Result<()> {
        if self.native.is_none() {
            return Err(Error::AlreadyDestroyed);
        }
        Ok(())
    }

    fn dispatch(&self) -> Result<()> {
        let native = self.native.clone().ok_or(Error::AlreadyDestroyed)?;
        let report = Report::from(&self.state);
        let id = self.id;
        trace!(%id, report = %report.to_hex(), "dispatch requested");

        self.runtime.spawn(
            async move {
                if let Err(e) = native.dispatch(report).await {
                    warn!(error = %format!("{e:#}"), "report dispatch failed");
                }
            }
            .instrument(tracing::debug_span!("dispatch", %id)),
        );
        Ok(())
    }
}

impl std::fmt::Debug for VirtualDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDevice")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
