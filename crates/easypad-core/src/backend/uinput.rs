//! Linux backend on top of `/dev/uinput`.
//!
//! The HID descriptor has no meaning here; each report is translated into the
//! evdev key/abs events of an Xbox 360 style pad and flushed with a SYN.

use super::{Backend, NativeDevice};
use crate::config::UInputConfig;
use anyhow::{bail, Context, Result};
use easypad_protocol::{Buttons, DeviceIdentity, Report};
use input_linux::{
    AbsoluteAxis, AbsoluteEvent, AbsoluteInfo, AbsoluteInfoSetup, EventKind, EventTime, InputId,
    Key, KeyEvent, KeyState, SynchronizeEvent, SynchronizeKind, UInputHandle,
};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const KEY_MAP: [(Buttons, Key); 12] = [
    (Buttons::A, Key::ButtonSouth),
    (Buttons::B, Key::ButtonEast),
    (Buttons::X, Key::ButtonNorth),
    (Buttons::Y, Key::ButtonWest),
    (Buttons::LB, Key::ButtonTL),
    (Buttons::RB, Key::ButtonTR),
    (Buttons::LT_CLICK, Key::ButtonTL2),
    (Buttons::RT_CLICK, Key::ButtonTR2),
    (Buttons::BACK, Key::ButtonSelect),
    (Buttons::START, Key::ButtonStart),
    (Buttons::LEFT_THUMB, Key::ButtonThumbl),
    (Buttons::RIGHT_THUMB, Key::ButtonThumbr),
];

const STICK_AXES: [AbsoluteAxis; 4] =
    [AbsoluteAxis::X, AbsoluteAxis::Y, AbsoluteAxis::RX, AbsoluteAxis::RY];

pub struct UInputBackend {
    config: UInputConfig,
}

impl UInputBackend {
    pub fn new(config: UInputConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }

    fn open_node(&self) -> Result<File> {
        let mut last_err = None;
        for path in &self.config.paths {
            match open(path) {
                Ok(file) => {
                    debug!(path = %path.display(), "opened uinput node");
                    return Ok(file);
                }
                Err(e) => last_err = Some(e.context(format!("open {}", path.display()))),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no uinput paths configured")))
    }
}

fn open(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?)
}

#[async_trait::async_trait]
impl Backend for UInputBackend {
    fn name(&self) -> &'static str {
        "uinput"
    }

    fn probe(&self) -> bool {
        self.open_node().is_ok()
    }

    async fn install(&self) -> Result<bool> {
        let modules = tokio::fs::read_to_string("/proc/modules")
            .await
            .context("read /proc/modules")?;
        if modules.lines().any(|l| l.starts_with("uinput ")) {
            debug!("uinput module already loaded");
            return Ok(self.probe());
        }

        info!("loading uinput kernel module");
        let status = tokio::process::Command::new("modprobe")
            .arg("uinput")
            .status()
            .await
            .context("spawn modprobe")?;
        if !status.success() {
            warn!(%status, "modprobe uinput failed");
            return Ok(false);
        }
        Ok(self.probe())
    }

    fn construct(&self, identity: &DeviceIdentity) -> Result<Arc<dyn NativeDevice>> {
        let handle = UInputHandle::new(self.open_node()?);

        handle.set_evbit(EventKind::Key)?;
        for (_, key) in KEY_MAP {
            handle.set_keybit(key)?;
        }
        handle.set_evbit(EventKind::Absolute)?;
        for axis in STICK_AXES {
            handle.set_absbit(axis)?;
        }
        for axis in [AbsoluteAxis::Z, AbsoluteAxis::RZ, AbsoluteAxis::Hat0X, AbsoluteAxis::Hat0Y] {
            handle.set_absbit(axis)?;
        }

        let stick = AbsoluteInfo {
            minimum: i32::from(i16::MIN),
            maximum: i32::from(i16::MAX),
            ..AbsoluteInfo::default()
        };
        let trigger = AbsoluteInfo { minimum: 0, maximum: 255, ..AbsoluteInfo::default() };
        let hat = AbsoluteInfo { minimum: -1, maximum: 1, ..AbsoluteInfo::default() };

        let mut abs: Vec<AbsoluteInfoSetup> =
            STICK_AXES.iter().map(|&axis| AbsoluteInfoSetup { axis, info: stick }).collect();
        abs.push(AbsoluteInfoSetup { axis: AbsoluteAxis::Z, info: trigger });
        abs.push(AbsoluteInfoSetup { axis: AbsoluteAxis::RZ, info: trigger });
        abs.push(AbsoluteInfoSetup { axis: AbsoluteAxis::Hat0X, info: hat });
        abs.push(AbsoluteInfoSetup { axis: AbsoluteAxis::Hat0Y, info: hat });

        handle
            .create(
                &InputId {
                    bustype: input_linux::sys::BUS_USB,
                    vendor: identity.vendor_id,
                    product: identity.product_id,
                    version: 1,
                },
                identity.product.as_bytes(),
                0,
                &abs,
            )
            .context("UI_DEV_CREATE")?;

        info!(product = %identity.product, "uinput device created");
        Ok(Arc::new(UInputDevice {
            handle: Mutex::new(Some(handle)),
            settle: Duration::from_millis(self.config.settle_ms),
        }))
    }
}

struct UInputDevice {
    handle: Mutex<Option<UInputHandle<File>>>,
    settle: Duration,
}

#[async_trait::async_trait]
impl NativeDevice for UInputDevice {
    async fn activate(&self) -> Result<()> {
        // udev needs a moment to publish the event node
        tokio::time::sleep(self.settle).await;
        if self.handle.lock().is_none() {
            bail!("uinput device released during activation");
        }
        Ok(())
    }

    async fn dispatch(&self, report: Report) -> Result<()> {
        let events = translate(&report);
        let guard = self.handle.lock();
        let Some(handle) = guard.as_ref() else {
            bail!("uinput device released");
        };
        handle.write(&events).context("write uinput events")?;
        Ok(())
    }

    fn teardown(&self) {
        if let Some(handle) = self.handle.lock().take() {
            if let Err(e) = handle.dev_destroy() {
                warn!(error = %e, "UI_DEV_DESTROY failed");
            }
        }
    }
}

/// Full state as evdev events; the kernel drops values that did not change.
fn translate(report: &Report) -> Vec<input_linux::sys::input_event> {
    let time = EventTime::default();
    let buttons = report.buttons();
    let mut events = Vec::with_capacity(KEY_MAP.len() + 9);

    for (button, key) in KEY_MAP {
        let state = if buttons.contains(button) { KeyState::PRESSED } else { KeyState::RELEASED };
        events.push(*KeyEvent::new(time, key, state).as_event().as_raw());
    }

    let mut abs = |axis, value: i32| {
        events.push(*AbsoluteEvent::new(time, axis, value).as_event().as_raw());
    };
    for (i, axis) in STICK_AXES.into_iter().enumerate() {
        abs(axis, i32::from(report.stick(i).unwrap_or(0)));
    }
    abs(AbsoluteAxis::Z, i32::from(report.left_trigger()));
    abs(AbsoluteAxis::RZ, i32::from(report.right_trigger()));
    abs(AbsoluteAxis::Hat0X, hat(buttons, Buttons::DPAD_LEFT, Buttons::DPAD_RIGHT));
    abs(AbsoluteAxis::Hat0Y, hat(buttons, Buttons::DPAD_UP, Buttons::DPAD_DOWN));

    events.push(
        *SynchronizeEvent::new(time, SynchronizeKind::Report, 0)
            .as_event()
            .as_raw(),
    );
    events
}

fn hat(buttons: Buttons, negative: Buttons, positive: Buttons) -> i32 {
    i32::from(buttons.contains(positive)) - i32::from(buttons.contains(negative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hat_from_dpad() {
        assert_eq!(hat(Buttons::DPAD_LEFT, Buttons::DPAD_LEFT, Buttons::DPAD_RIGHT), -1);
        assert_eq!(hat(Buttons::DPAD_DOWN, Buttons::DPAD_UP, Buttons::DPAD_DOWN), 1);
        assert_eq!(
            hat(Buttons::DPAD_UP | Buttons::DPAD_DOWN, Buttons::DPAD_UP, Buttons::DPAD_DOWN),
            0
        );
    }

    #[test]
    fn translate_emits_full_state_then_syn() {
        let events = translate(&Report::from([0; Report::LEN]));
        assert_eq!(events.len(), KEY_MAP.len() + 8 + 1);
        let last = events[events.len() - 1];
        assert_eq!(last.type_, input_linux::sys::EV_SYN as u16);
    }

    #[test]
    fn missing_node_is_unsupported() {
        let backend = UInputBackend::new(UInputConfig {
            paths: vec!["/nonexistent/uinput".into()],
            settle_ms: 0,
        });
        assert!(!backend.probe());
        assert!(backend.construct(&DeviceIdentity::default()).is_err());
    }
}
