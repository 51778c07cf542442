//! Process-wide table of live virtual gamepads.
//!
//! One registry is built at startup and handed to whatever exposes the
//! control API. Every operation takes the single table lock for its whole
//! duration; nothing awaits while holding it. Entries are only removed by an
//! explicit [`Registry::destroy`] (or [`Registry::destroy_all`]).

use crate::activation::{Activation, Lifecycle, Outcome};
use crate::backend::{Backend, Unsupported};
use crate::config::Config;
use crate::device::VirtualDevice;
use crate::error::{Error, Result};
use easypad_protocol::{DeviceId, DeviceIdentity};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn Backend>,
    runtime: Handle,
    identity: DeviceIdentity,
    activation_timeout: Duration,
    table: Mutex<Table>,
}

struct Table {
    next_id: u64,
    // ids are monotonic, so key order is creation order
    devices: BTreeMap<DeviceId, VirtualDevice>,
}

impl Registry {
    /// Background work (activation, dispatch) is spawned onto `runtime`.
    pub fn new(backend: Arc<dyn Backend>, config: &Config, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                runtime,
                identity: config.identity.clone(),
                activation_timeout: config.activation_timeout(),
                table: Mutex::new(Table { next_id: 1, devices: BTreeMap::new() }),
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.shared.backend.name()
    }

    /// Platform capability probe, no side effects.
    pub fn is_supported(&self) -> bool {
        self.shared.backend.probe()
    }

    /// Provision a missing driver. Resolves immediately when already supported.
    #[instrument(level = "info", skip(self), fields(backend = self.backend_name()))]
    pub async fn install(&self) -> Result<bool> {
        if self.is_supported() {
            debug!("already supported, nothing to install");
            return Ok(true);
        }
        let ok = self.shared.backend.install().await.map_err(Error::Install)?;
        info!(ok, "install finished");
        Ok(ok)
    }

    /// Construct a device and start activating it in the background.
    ///
    /// Returns as soon as construction succeeds; poll [`Registry::is_active`]
    /// or await [`Registry::watch`] to learn how activation went. A failed
    /// construction still consumes an id.
    #[instrument(level = "info", skip(self))]
    pub fn create(&self) -> Result<DeviceId> {
        let shared = &self.shared;
        let mut table = shared.table.lock();

        let id = DeviceId(table.next_id);
        table.next_id += 1;

        if !shared.backend.probe() {
            warn!(%id, backend = shared.backend.name(), "platform probe failed");
            return Err(Error::UnsupportedPlatform);
        }
        let native = shared.backend.construct(&shared.identity).map_err(|e| {
            if e.downcast_ref::<Unsupported>().is_some() {
                Error::UnsupportedPlatform
            } else {
                Error::Creation(e)
            }
        })?;

        let mut device = VirtualDevice::new(id, Arc::clone(&native), shared.runtime.clone());
        let weak = Arc::downgrade(shared);
        let activation = Activation::spawn(
            &shared.runtime,
            id,
            native,
            shared.activation_timeout,
            move |outcome| finish_activation(weak, id, outcome),
        );
        device.begin_activation(activation);
        table.devices.insert(id, device);

        info!(%id, "device created");
        Ok(id)
    }

    /// Remove and release a device. `false` for unknown or already destroyed ids.
    #[instrument(level = "info", skip(self))]
    pub fn destroy(&self, id: DeviceId) -> bool {
        let removed = self.shared.table.lock().devices.remove(&id);
        match removed {
            Some(mut device) => {
                device.destroy();
                info!(%id, "device destroyed");
                true
            }
            None => {
                debug!(%id, "destroy of unknown device");
                false
            }
        }
    }

    /// Destroy every live device; returns how many were released.
    pub fn destroy_all(&self) -> usize {
        let drained = std::mem::take(&mut self.shared.table.lock().devices);
        let count = drained.len();
        for (_, mut device) in drained {
            device.destroy();
        }
        if count > 0 {
            info!(count, "released all devices");
        }
        count
    }

    /// Run `f` against a live device under the registry lock.
    pub fn with_device<R>(&self, id: DeviceId, f: impl FnOnce(&mut VirtualDevice) -> R) -> Result<R> {
        let mut table = self.shared.table.lock();
        let device = table.devices.get_mut(&id).ok_or(Error::InvalidHandle(id))?;
        Ok(f(device))
    }

    /// Live ids in creation order.
    pub fn list(&self) -> Vec<DeviceId> {
        self.shared.table.lock().devices.keys().copied().collect()
    }

    pub fn button_down(&self, id: DeviceId, index: usize) -> Result<()> {
        self.with_device(id, |d| d.button_down(index))?
    }

    pub fn button_up(&self, id: DeviceId, index: usize) -> Result<()> {
        self.with_device(id, |d| d.button_up(index))?
    }

    pub fn set_axis(&self, id: DeviceId, index: usize, value: i16) -> Result<()> {
        self.with_device(id, |d| d.set_axis(index, value))?
    }

    /// `false` for unknown ids.
    pub fn is_active(&self, id: DeviceId) -> bool {
        self.with_device(id, |d| d.is_active()).unwrap_or(false)
    }

    pub fn is_initialized(&self, id: DeviceId) -> bool {
        self.with_device(id, |d| d.is_initialized()).unwrap_or(false)
    }

    pub fn lifecycle(&self, id: DeviceId) -> Result<Lifecycle> {
        self.with_device(id, |d| d.lifecycle())
    }

    /// Subscribe to lifecycle changes; the receiver sees `Destroyed` on destroy.
    pub fn watch(&self, id: DeviceId) -> Result<watch::Receiver<Lifecycle>> {
        self.with_device(id, |d| d.subscribe())
    }
}

fn finish_activation(shared: Weak<Shared>, id: DeviceId, outcome: Outcome) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut table = shared.table.lock();
    let Some(device) = table.devices.get_mut(&id) else {
        debug!(%id, "activation finished for a destroyed device");
        return;
    };
    match outcome {
        Outcome::Activated => {
            if device.finish_activation(Lifecycle::Activated) {
                info!(%id, "device activated");
            }
        }
        Outcome::Failed(reason) => {
            if device.finish_activation(Lifecycle::Failed) {
                let err = Error::Activation(reason);
                warn!(%id, error = %err, "device did not come online");
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("backend", &self.backend_name())
            .field("devices", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Mock, MockBehavior};
    use crate::backend::unsupported::UnsupportedBackend;

    fn registry(behavior: MockBehavior) -> (Arc<Mock>, Registry) {
        let mock = Mock::new(behavior);
        let reg = Registry::new(mock.clone(), &Config::default(), Handle::current());
        (mock, reg)
    }

    #[tokio::test]
    async fn ids_start_at_one_and_never_repeat() {
        let (_mock, reg) = registry(MockBehavior::default());
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();
        assert_eq!((a, b), (DeviceId(1), DeviceId(2)));
        assert!(reg.destroy(b));
        assert_eq!(reg.create().unwrap(), DeviceId(3));
        assert_eq!(reg.list(), vec![DeviceId(1), DeviceId(3)]);
    }

    #[tokio::test]
    async fn failed_construction_installs_nothing() {
        let (mock, reg) = registry(MockBehavior { fail_construct: true, ..Default::default() });
        assert!(matches!(reg.create(), Err(Error::Creation(_))));
        assert!(reg.list().is_empty());
        assert_eq!(mock.live_count(), 0);
    }

    #[tokio::test]
    async fn unsupported_backend() {
        let reg = Registry::new(UnsupportedBackend::new(), &Config::default(), Handle::current());
        assert!(!reg.is_supported());
        assert!(matches!(reg.create(), Err(Error::UnsupportedPlatform)));
        assert!(!reg.install().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_handle() {
        let (_mock, reg) = registry(MockBehavior::default());
        assert!(matches!(reg.button_down(DeviceId(9), 0), Err(Error::InvalidHandle(DeviceId(9)))));
        assert!(!reg.destroy(DeviceId(9)));
        assert!(!reg.is_active(DeviceId(9)));
    }

    #[tokio::test]
    async fn destroy_all_releases_everything() {
        let (mock, reg) = registry(MockBehavior::default());
        reg.create().unwrap();
        reg.create().unwrap();
        assert_eq!(reg.destroy_all(), 2);
        assert!(reg.list().is_empty());
        assert_eq!(mock.live_count(), 0);
    }
}
