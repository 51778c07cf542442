use super::{Backend, NativeDevice};
use anyhow::{bail, Result};
use dashmap::DashMap;
use easypad_protocol::{DeviceIdentity, Report};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Knobs for the in-process backend.
#[derive(Clone, Debug, Default)]
pub struct MockBehavior {
    /// Initial probe result is `!unsupported`; `install` clears it.
    pub unsupported: bool,
    pub fail_construct: bool,
    pub fail_activation: bool,
    /// Never resolve `activate`, to exercise cancellation.
    pub hang_activation: bool,
    pub activation_delay: Duration,
}

/// One report as seen by the mock OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub native: u64,
    pub report: Report,
    /// Whether the device had finished activating when the report arrived.
    pub active: bool,
}

/// Backend that records instead of talking to an OS.
pub struct Mock {
    shared: Arc<Shared>,
}

struct Shared {
    next: AtomicU64,
    live: DashMap<u64, MockEntry>,
    supported: AtomicBool,
    behavior: MockBehavior,
    reports: Option<mpsc::UnboundedSender<Dispatched>>,
    abandoned_activations: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default)]
struct MockEntry {
    active: bool,
}

impl Mock {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self::build(behavior, None))
    }

    /// Like [`Mock::new`], also streaming every dispatched report.
    pub fn with_reports(
        behavior: MockBehavior,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Dispatched>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::build(behavior, Some(tx))), rx)
    }

    fn build(behavior: MockBehavior, reports: Option<mpsc::UnboundedSender<Dispatched>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                next: AtomicU64::new(1),
                live: DashMap::new(),
                supported: AtomicBool::new(!behavior.unsupported),
                behavior,
                reports,
                abandoned_activations: AtomicUsize::new(0),
            }),
        }
    }

    /// Native devices constructed and not yet torn down.
    pub fn live_count(&self) -> usize {
        self.shared.live.len()
    }

    /// Activations dropped before they resolved.
    pub fn abandoned_activations(&self) -> usize {
        self.shared.abandoned_activations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Backend for Mock {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn probe(&self) -> bool {
        self.shared.supported.load(Ordering::SeqCst)
    }

    async fn install(&self) -> Result<bool> {
        self.shared.supported.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn construct(&self, _identity: &DeviceIdentity) -> Result<Arc<dyn NativeDevice>> {
        if self.shared.behavior.fail_construct {
            bail!("mock construction refused");
        }
        let native = self.shared.next.fetch_add(1, Ordering::SeqCst);
        self.shared.live.insert(native, MockEntry::default());
        Ok(Arc::new(MockDevice { shared: Arc::clone(&self.shared), native }))
    }
}

struct MockDevice {
    shared: Arc<Shared>,
    native: u64,
}

/// Counts an activation future dropped before completion.
struct AbandonGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abandoned_activations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl NativeDevice for MockDevice {
    async fn activate(&self) -> Result<()> {
        let mut guard = AbandonGuard { shared: &self.shared, armed: true };
        let behavior = &self.shared.behavior;
        if behavior.hang_activation {
            std::future::pending::<()>().await;
        }
        if !behavior.activation_delay.is_zero() {
            tokio::time::sleep(behavior.activation_delay).await;
        }
        guard.armed = false;

        if behavior.fail_activation {
            bail!("mock activation refused");
        }
        match self.shared.live.get_mut(&self.native) {
            Some(mut entry) => {
                entry.active = true;
                Ok(())
            }
            None => bail!("device {} torn down before activation", self.native),
        }
    }

    async fn dispatch(&self, report: Report) -> Result<()> {
        let Some(active) = self.shared.live.get(&self.native).map(|e| e.active) else {
            bail!("device {} torn down", self.native);
        };
        if let Some(tx) = &self.shared.reports {
            let _ = tx.send(Dispatched { native: self.native, report, active });
        }
        Ok(())
    }

    fn teardown(&self) {
        self.shared.live.remove(&self.native);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easypad_protocol::GamepadState;

    #[tokio::test]
    async fn install_flips_probe() {
        let mock = Mock::new(MockBehavior { unsupported: true, ..Default::default() });
        assert!(!mock.probe());
        assert!(mock.install().await.unwrap());
        assert!(mock.probe());
    }

    #[tokio::test]
    async fn records_reports_and_teardown() {
        let (mock, mut rx) = Mock::with_reports(MockBehavior::default());
        let dev = mock.construct(&DeviceIdentity::default()).unwrap();
        assert_eq!(mock.live_count(), 1);

        dev.activate().await.unwrap();
        let report = Report::from(&GamepadState::default());
        dev.dispatch(report).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got, Dispatched { native: 1, report, active: true });

        dev.teardown();
        dev.teardown();
        assert_eq!(mock.live_count(), 0);
        assert!(dev.dispatch(report).await.is_err());
    }

    #[tokio::test]
    async fn construct_failure() {
        let mock = Mock::new(MockBehavior { fail_construct: true, ..Default::default() });
        assert!(mock.construct(&DeviceIdentity::default()).is_err());
        assert_eq!(mock.live_count(), 0);
    }
}
