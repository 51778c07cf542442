//! Platform backends.
//!
//! A backend is chosen once per process by [`select`] and shared by the
//! registry. It probes for support, provisions missing drivers, and constructs
//! native devices; each [`NativeDevice`] then handles its own activation,
//! report dispatch and teardown.

pub mod mock;
pub mod unsupported;

#[cfg(target_os = "macos")]
pub mod mac_hid;
#[cfg(target_os = "linux")]
pub mod uinput;
#[cfg(target_os = "windows")]
pub mod vjoy;

use crate::config::{BackendChoice, Config};
use anyhow::Result;
use easypad_protocol::{DeviceIdentity, Report};
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Capability probe. Must not have side effects.
    fn probe(&self) -> bool;

    /// Provision whatever the probe found missing. Resolves to the probe
    /// result afterwards.
    async fn install(&self) -> Result<bool>;

    /// Build and register a device with the fixed report descriptor.
    fn construct(&self, identity: &DeviceIdentity) -> Result<Arc<dyn NativeDevice>>;
}

/// One OS-registered virtual device.
#[async_trait::async_trait]
pub trait NativeDevice: Send + Sync + 'static {
    /// Bring the device online. Runs in the background after construction.
    async fn activate(&self) -> Result<()>;

    /// Hand one full report to the OS input stack.
    async fn dispatch(&self, report: Report) -> Result<()>;

    /// Release the native resource. Idempotent; later dispatches must fail
    /// quietly instead of touching freed state.
    fn teardown(&self);
}

/// Error returned by `construct` when the platform cannot host devices at all.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Unsupported(pub &'static str);

/// Pick the backend for this process.
pub fn select(config: &Config) -> Arc<dyn Backend> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendChoice::Auto => platform_default(config),
        BackendChoice::Mock => mock::Mock::new(mock::MockBehavior::default()),
        BackendChoice::Unsupported => unsupported::UnsupportedBackend::new(),
        BackendChoice::MacHid => mac_hid_backend(config),
        BackendChoice::Vjoy => vjoy_backend(config),
        BackendChoice::Uinput => uinput_backend(config),
    };
    info!(backend = backend.name(), choice = ?config.backend, "selected backend");
    backend
}

fn platform_default(config: &Config) -> Arc<dyn Backend> {
    if cfg!(target_os = "macos") {
        mac_hid_backend(config)
    } else if cfg!(target_os = "windows") {
        vjoy_backend(config)
    } else if cfg!(target_os = "linux") {
        uinput_backend(config)
    } else {
        unsupported::UnsupportedBackend::new()
    }
}

#[allow(unused_variables)]
fn mac_hid_backend(config: &Config) -> Arc<dyn Backend> {
    #[cfg(target_os = "macos")]
    return mac_hid::MacHidBackend::new(config.mac.clone());
    #[cfg(not(target_os = "macos"))]
    {
        warn!("mac-hid backend requested on a non-macOS host");
        unsupported::UnsupportedBackend::new()
    }
}

#[allow(unused_variables)]
fn vjoy_backend(config: &Config) -> Arc<dyn Backend> {
    #[cfg(target_os = "windows")]
    return vjoy::VJoyBackend::new(config.vjoy.clone());
    #[cfg(not(target_os = "windows"))]
    {
        warn!("vjoy backend requested on a non-Windows host");
        unsupported::UnsupportedBackend::new()
    }
}

#[allow(unused_variables)]
fn uinput_backend(config: &Config) -> Arc<dyn Backend> {
    #[cfg(target_os = "linux")]
    return uinput::UInputBackend::new(config.uinput.clone());
    #[cfg(not(target_os = "linux"))]
    {
        warn!("uinput backend requested on a non-Linux host");
        unsupported::UnsupportedBackend::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_choices() {
        let mut cfg = Config { backend: BackendChoice::Mock, ..Default::default() };
        assert_eq!(select(&cfg).name(), "mock");

        cfg.backend = BackendChoice::Unsupported;
        let b = select(&cfg);
        assert_eq!(b.name(), "unsupported");
        assert!(!b.probe());
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn foreign_backend_degrades_to_unsupported() {
        let cfg = Config { backend: BackendChoice::Vjoy, ..Default::default() };
        assert_eq!(select(&cfg).name(), "unsupported");
    }
}
