//! macOS backend: user-space HID devices through IOKit's `IOHIDUserDevice`.
//!
//! The device is registered with [`REPORT_DESCRIPTOR`] and the configured
//! identity; reports are handed to the HID stack verbatim.

use super::{Backend, NativeDevice};
use crate::config::MacConfig;
use anyhow::{anyhow, bail, Context, Result};
use core_foundation::base::{kCFAllocatorDefault, CFAllocatorRef, CFIndex, CFRelease, CFType, TCFType};
use core_foundation::data::CFData;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use easypad_protocol::{DeviceIdentity, Report, REPORT_DESCRIPTOR};
use parking_lot::Mutex;
use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;
use tracing::{debug, info, warn};

type IOHIDUserDeviceRef = *mut c_void;
type DispatchQueue = *mut c_void;

const K_IO_RETURN_SUCCESS: i32 = 0;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IOHIDUserDeviceCreateWithProperties(
        allocator: CFAllocatorRef,
        properties: CFDictionaryRef,
        options: u32,
    ) -> IOHIDUserDeviceRef;
    fn IOHIDUserDeviceSetDispatchQueue(device: IOHIDUserDeviceRef, queue: DispatchQueue);
    fn IOHIDUserDeviceActivate(device: IOHIDUserDeviceRef);
    fn IOHIDUserDeviceCancel(device: IOHIDUserDeviceRef);
    fn IOHIDUserDeviceHandleReportWithTimeStamp(
        device: IOHIDUserDeviceRef,
        timestamp: u64,
        report: *const u8,
        report_length: CFIndex,
    ) -> i32;
}

extern "C" {
    fn dispatch_queue_create(label: *const c_char, attr: *const c_void) -> DispatchQueue;
    fn dispatch_release(object: *mut c_void);
}

pub struct MacHidBackend {
    config: MacConfig,
}

impl MacHidBackend {
    pub fn new(config: MacConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

/// `kern.osproductversion` as (major, minor).
fn os_version() -> Option<(u32, u32)> {
    let mut buf = [0u8; 32];
    let mut len = buf.len();
    let rc = unsafe {
        libc::sysctlbyname(
            c"kern.osproductversion".as_ptr(),
            buf.as_mut_ptr().cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    let text = CStr::from_bytes_until_nul(&buf[..len.min(buf.len())]).ok()?.to_str().ok()?;
    parse_version(text)
}

fn parse_version(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    Some((major, minor))
}

fn properties(identity: &DeviceIdentity) -> CFDictionary<CFString, CFType> {
    let pairs: [(CFString, CFType); 7] = [
        (CFString::new("ReportDescriptor"), CFData::from_buffer(REPORT_DESCRIPTOR).as_CFType()),
        (CFString::new("VendorID"), CFNumber::from(i32::from(identity.vendor_id)).as_CFType()),
        (CFString::new("ProductID"), CFNumber::from(i32::from(identity.product_id)).as_CFType()),
        (CFString::new("Transport"), CFString::new("USB").as_CFType()),
        (CFString::new("Product"), CFString::new(&identity.product).as_CFType()),
        (CFString::new("Manufacturer"), CFString::new(&identity.manufacturer).as_CFType()),
        (CFString::new("SerialNumber"), CFString::new(&identity.serial).as_CFType()),
    ];
    CFDictionary::from_CFType_pairs(&pairs)
}

#[async_trait::async_trait]
impl Backend for MacHidBackend {
    fn name(&self) -> &'static str {
        "mac-hid"
    }

    fn probe(&self) -> bool {
        match os_version() {
            Some(v) => v >= self.config.min_os_version,
            None => false,
        }
    }

    async fn install(&self) -> Result<bool> {
        Ok(self.probe())
    }

    fn construct(&self, identity: &DeviceIdentity) -> Result<Arc<dyn NativeDevice>> {
        let props = properties(identity);
        let raw = unsafe {
            IOHIDUserDeviceCreateWithProperties(
                kCFAllocatorDefault,
                props.as_concrete_TypeRef(),
                0,
            )
        };
        if raw.is_null() {
            bail!("IOHIDUserDeviceCreateWithProperties returned null");
        }
        let queue = unsafe { dispatch_queue_create(c"easypad.hid".as_ptr(), std::ptr::null()) };
        if queue.is_null() {
            unsafe { CFRelease(raw) };
            bail!("dispatch_queue_create returned null");
        }
        unsafe { IOHIDUserDeviceSetDispatchQueue(raw, queue) };

        info!(product = %identity.product, "HID user device created");
        Ok(Arc::new(MacHidDevice {
            inner: Arc::new(Mutex::new(Some(Raw { device: raw, queue, activated: false }))),
        }))
    }
}

struct Raw {
    device: IOHIDUserDeviceRef,
    queue: DispatchQueue,
    activated: bool,
}

// IOHIDUserDevice is thread safe once a dispatch queue is set; access is
// serialized by the mutex regardless.
unsafe impl Send for Raw {}

impl Raw {
    fn release(self) {
        unsafe {
            if self.activated {
                IOHIDUserDeviceCancel(self.device);
            }
            CFRelease(self.device);
            dispatch_release(self.queue);
        }
    }
}

struct MacHidDevice {
    inner: Arc<Mutex<Option<Raw>>>,
}

#[async_trait::async_trait]
impl NativeDevice for MacHidDevice {
    async fn activate(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock();
            let raw = guard.as_mut().ok_or_else(|| anyhow!("device released before activation"))?;
            unsafe { IOHIDUserDeviceActivate(raw.device) };
            raw.activated = true;
            debug!("HID user device activated");
            Ok(())
        })
        .await
        .context("activation worker")?
    }

    async fn dispatch(&self, report: Report) -> Result<()> {
        let guard = self.inner.lock();
        let Some(raw) = guard.as_ref() else {
            bail!("device released");
        };
        let bytes = report.as_bytes();
        let rc = unsafe {
            IOHIDUserDeviceHandleReportWithTimeStamp(
                raw.device,
                libc::mach_absolute_time(),
                bytes.as_ptr(),
                bytes.len() as CFIndex,
            )
        };
        if rc != K_IO_RETURN_SUCCESS {
            bail!("IOHIDUserDeviceHandleReport failed: {rc:#x}");
        }
        Ok(())
    }

    fn teardown(&self) {
        if let Some(raw) = self.inner.lock().take() {
            raw.release();
            debug!("HID user device released");
        }
    }
}

impl Drop for MacHidDevice {
    fn drop(&mut self) {
        if let Some(raw) = self.inner.lock().take() {
            warn!("HID user device dropped without teardown");
            raw.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("14.5"), Some((14, 5)));
        assert_eq!(parse_version("15"), Some((15, 0)));
        assert_eq!(parse_version("10.15.7\n"), Some((10, 15)));
        assert_eq!(parse_version("x.1"), None);
    }

    #[test]
    fn host_reports_a_version() {
        assert!(os_version().is_some());
    }
}
