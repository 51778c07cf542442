//! Control API consumed by the host layer.
//!
//! Everything here returns `bool`/`Option` sentinels; the underlying
//! [`Error`](crate::Error) is logged and dropped, so "not supported" never
//! needs error handling on the caller side.

use crate::activation::Lifecycle;
use crate::backend::{self, Backend};
use crate::config::Config;
use crate::registry::Registry;
use easypad_protocol::{DeviceId, GamepadState};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};

#[derive(Clone, Debug)]
pub struct Gamepads {
    registry: Registry,
}

impl Gamepads {
    /// Select the backend from `config` and build a registry on the current runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &Config) -> Self {
        Self::with_backend(backend::select(config), config, Handle::current())
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: &Config, runtime: Handle) -> Self {
        Self { registry: Registry::new(backend, config, runtime) }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_supported(&self) -> bool {
        self.registry.is_supported()
    }

    pub async fn install(&self) -> bool {
        match self.registry.install().await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "install failed");
                false
            }
        }
    }

    /// `None` when the platform is unsupported or the backend refused.
    pub fn create(&self) -> Option<DeviceId> {
        self.registry
            .create()
            .map_err(|e| warn!(error = %e, "create failed"))
            .ok()
    }

    pub fn list(&self) -> Vec<DeviceId> {
        self.registry.list()
    }

    #[instrument(level = "debug", skip(self))]
    pub fn button_down(&self, id: DeviceId, index: i64) -> bool {
        let Some(index) = to_index(index) else {
            debug!("negative button index");
            return false;
        };
        report(self.registry.button_down(id, index))
    }

    #[instrument(level = "debug", skip(self))]
    pub fn button_up(&self, id: DeviceId, index: i64) -> bool {
        let Some(index) = to_index(index) else {
            debug!("negative button index");
            return false;
        };
        report(self.registry.button_up(id, index))
    }

    #[instrument(level = "debug", skip(self))]
    pub fn set_axis(&self, id: DeviceId, index: i64, value: i16) -> bool {
        let Some(index) = to_index(index) else {
            debug!("negative axis index");
            return false;
        };
        report(self.registry.set_axis(id, index, value))
    }

    /// Axis value in `-1.0..=1.0`, scaled to the signed 16-bit range.
    pub fn set_axis_normalized(&self, id: DeviceId, index: i64, value: f64) -> bool {
        if !(-1.0..=1.0).contains(&value) {
            debug!(%id, value, "normalized axis value out of range");
            return false;
        }
        self.set_axis(id, index, (value * f64::from(i16::MAX)).round() as i16)
    }

    pub fn destroy(&self, id: DeviceId) -> bool {
        self.registry.destroy(id)
    }

    pub fn is_active(&self, id: DeviceId) -> bool {
        self.registry.is_active(id)
    }

    pub fn is_initialized(&self, id: DeviceId) -> bool {
        self.registry.is_initialized(id)
    }

    pub fn lifecycle(&self, id: DeviceId) -> Option<Lifecycle> {
        self.registry.lifecycle(id).ok()
    }

    /// Snapshot of the last state written to `id`.
    pub fn state(&self, id: DeviceId) -> Option<GamepadState> {
        self.registry.with_device(id, |d| *d.state()).ok()
    }
}

fn to_index(index: i64) -> Option<usize> {
    usize::try_from(index).ok()
}

fn report(res: crate::Result<()>) -> bool {
    match res {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "rejected");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Mock, MockBehavior};

    fn pads() -> Gamepads {
        Gamepads::with_backend(Mock::new(MockBehavior::default()), &Config::default(), Handle::current())
    }

    #[tokio::test]
    async fn sentinels_instead_of_errors() {
        let pads = pads();
        assert!(!pads.button_down(DeviceId(1), 0));
        let id = pads.create().unwrap();
        assert!(pads.button_down(id, 0));
        assert!(!pads.button_down(id, -1));
        assert!(!pads.button_down(id, 16));
        assert!(!pads.set_axis(id, 6, 0));
        assert!(pads.state(DeviceId(99)).is_none());
    }

    #[tokio::test]
    async fn normalized_axis() {
        let pads = pads();
        let id = pads.create().unwrap();
        assert!(pads.set_axis_normalized(id, 0, 1.0));
        assert!(pads.set_axis_normalized(id, 1, -1.0));
        assert!(!pads.set_axis_normalized(id, 2, 1.5));
        assert!(!pads.set_axis_normalized(id, 2, f64::NAN));
        let state = pads.state(id).unwrap();
        assert_eq!((state.lx, state.ly, state.rx), (32767, -32767, 0));
    }
}
