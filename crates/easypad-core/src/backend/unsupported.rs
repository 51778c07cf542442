use super::{Backend, NativeDevice, Unsupported};
use anyhow::Result;
use easypad_protocol::DeviceIdentity;
use std::sync::Arc;

/// Stand-in for hosts without a recognized virtual-device facility.
pub struct UnsupportedBackend;

impl UnsupportedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait::async_trait]
impl Backend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn probe(&self) -> bool {
        false
    }

    async fn install(&self) -> Result<bool> {
        Ok(false)
    }

    fn construct(&self, _identity: &DeviceIdentity) -> Result<Arc<dyn NativeDevice>> {
        Err(Unsupported("no virtual gamepad backend for this platform").into())
    }
}
