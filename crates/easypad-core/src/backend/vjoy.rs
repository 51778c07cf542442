//! Windows backend on top of the vJoy kernel driver.
//!
//! `vJoyInterface.dll` is loaded on every probe rather than linked, so a
//! driver installed while the process runs is picked up without a restart.
//! Each virtual gamepad owns one vJoy slot between `first_slot..=last_slot`.

use super::{Backend, NativeDevice};
use crate::config::VJoyConfig;
use anyhow::{anyhow, bail, Context, Result};
use easypad_protocol::{DeviceIdentity, Report};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use windows::core::{s, w, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, FreeLibrary, HMODULE, WAIT_OBJECT_0};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::Win32::System::Threading::{GetExitCodeProcess, WaitForSingleObject};
use windows::Win32::UI::Shell::{ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW};
use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;

const VJD_STAT_OWN: i32 = 0;
const VJD_STAT_FREE: i32 = 1;
/// Continuous POV value meaning "centered".
const HAT_NEUTRAL: u32 = u32::MAX;

/// `JOYSTICK_POSITION_V2` from the vJoy SDK.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct JoystickPosition {
    b_device: u8,
    w_throttle: i32,
    w_rudder: i32,
    w_aileron: i32,
    w_axis_x: i32,
    w_axis_y: i32,
    w_axis_z: i32,
    w_axis_x_rot: i32,
    w_axis_y_rot: i32,
    w_axis_z_rot: i32,
    w_slider: i32,
    w_dial: i32,
    w_wheel: i32,
    w_axis_vx: i32,
    w_axis_vy: i32,
    w_axis_vz: i32,
    w_axis_vbrx: i32,
    w_axis_vbry: i32,
    w_axis_vbrz: i32,
    l_buttons: i32,
    b_hats: u32,
    b_hats_ex1: u32,
    b_hats_ex2: u32,
    b_hats_ex3: u32,
    l_buttons_ex1: i32,
    l_buttons_ex2: i32,
    l_buttons_ex3: i32,
}

/// vJoy axes span `1..=0x8000`.
fn stick_to_vjoy(value: i16) -> i32 {
    ((i32::from(value) + 32768) >> 1) + 1
}

fn trigger_to_vjoy(value: u8) -> i32 {
    i32::from(value) * 0x7FFF / 255 + 1
}

impl JoystickPosition {
    /// Axis order follows the report descriptor: X Y Z Rx sticks, Ry Rz triggers.
    fn from_report(slot: u32, report: &Report) -> Self {
        let stick = |i| stick_to_vjoy(report.stick(i).unwrap_or(0));
        Self {
            b_device: slot as u8,
            w_axis_x: stick(0),
            w_axis_y: stick(1),
            w_axis_z: stick(2),
            w_axis_x_rot: stick(3),
            w_axis_y_rot: trigger_to_vjoy(report.left_trigger()),
            w_axis_z_rot: trigger_to_vjoy(report.right_trigger()),
            l_buttons: i32::from(report.buttons().bits()),
            b_hats: HAT_NEUTRAL,
            b_hats_ex1: HAT_NEUTRAL,
            b_hats_ex2: HAT_NEUTRAL,
            b_hats_ex3: HAT_NEUTRAL,
            ..Default::default()
        }
    }
}

type FnEnabled = unsafe extern "C" fn() -> i32;
type FnVersion = unsafe extern "C" fn() -> i16;
type FnDriverMatch = unsafe extern "C" fn(*mut u16, *mut u16) -> i32;
type FnStatus = unsafe extern "C" fn(u32) -> i32;
type FnSlot = unsafe extern "C" fn(u32) -> i32;
type FnRelinquish = unsafe extern "C" fn(u32);
type FnUpdate = unsafe extern "C" fn(u32, *mut JoystickPosition) -> i32;

/// Dynamically loaded `vJoyInterface.dll`.
struct Interface {
    module: HMODULE,
    enabled: FnEnabled,
    version: FnVersion,
    driver_match: FnDriverMatch,
    status: FnStatus,
    acquire: FnSlot,
    reset: FnSlot,
    relinquish: FnRelinquish,
    update: FnUpdate,
}

// The DLL handle and its entry points are process-global and thread safe.
unsafe impl Send for Interface {}
unsafe impl Sync for Interface {}

macro_rules! proc_addr {
    ($module:expr, $name:literal) => {{
        let raw = unsafe { GetProcAddress($module, s!($name)) }
            .ok_or_else(|| anyhow!(concat!("vJoyInterface.dll lacks ", $name)))?;
        unsafe { std::mem::transmute::<unsafe extern "system" fn() -> isize, _>(raw) }
    }};
}

impl Interface {
    fn load() -> Result<Arc<Self>> {
        let module = unsafe { LoadLibraryW(w!("vJoyInterface.dll")) }
            .context("load vJoyInterface.dll")?;
        let resolve = || -> Result<Self> {
            Ok(Self {
                module,
                enabled: proc_addr!(module, "vJoyEnabled"),
                version: proc_addr!(module, "GetvJoyVersion"),
                driver_match: proc_addr!(module, "DriverMatch"),
                status: proc_addr!(module, "GetVJDStatus"),
                acquire: proc_addr!(module, "AcquireVJD"),
                reset: proc_addr!(module, "ResetVJD"),
                relinquish: proc_addr!(module, "RelinquishVJD"),
                update: proc_addr!(module, "UpdateVJD"),
            })
        };
        match resolve() {
            Ok(iface) => Ok(Arc::new(iface)),
            Err(e) => {
                let _ = unsafe { FreeLibrary(module) };
                Err(e)
            }
        }
    }

    /// Driver enabled and matching the loaded interface DLL.
    fn ready(&self) -> bool {
        unsafe {
            if (self.enabled)() == 0 {
                debug!("vJoy driver not enabled");
                return false;
            }
            let (mut dll, mut drv) = (0u16, 0u16);
            let matched = (self.driver_match)(&mut dll, &mut drv) != 0;
            if !matched {
                warn!(dll = %format!("{dll:#x}"), driver = %format!("{drv:#x}"), "vJoy version mismatch");
            }
            debug!(version = %format!("{:#x}", (self.version)()), matched, "vJoy probed");
            matched
        }
    }

    fn status(&self, slot: u32) -> i32 {
        unsafe { (self.status)(slot) }
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        let _ = unsafe { FreeLibrary(self.module) };
    }
}

pub struct VJoyBackend {
    config: VJoyConfig,
}

impl VJoyBackend {
    pub fn new(config: VJoyConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }

    async fn verify(&self) -> bool {
        let interval = Duration::from_millis(self.config.verify_interval_ms);
        for attempt in 1..=self.config.verify_attempts {
            if self.probe() {
                debug!(attempt, "vJoy driver verified");
                return true;
            }
            tokio::time::sleep(interval).await;
        }
        false
    }
}

#[async_trait::async_trait]
impl Backend for VJoyBackend {
    fn name(&self) -> &'static str {
        "vjoy"
    }

    fn probe(&self) -> bool {
        match Interface::load() {
            Ok(iface) => iface.ready(),
            Err(e) => {
                debug!(error = %format!("{e:#}"), "vJoy interface unavailable");
                false
            }
        }
    }

    #[instrument(level = "info", skip(self))]
    async fn install(&self) -> Result<bool> {
        let installer = self
            .config
            .installer_path()
            .ok_or_else(|| anyhow!("cannot locate vJoy installer"))?;
        if !installer.exists() {
            bail!("vJoy installer not found at {}", installer.display());
        }

        let timeout = Duration::from_secs(self.config.installer_timeout_secs);
        info!(installer = %installer.display(), "running vJoy installer elevated");
        let exit_code = tokio::task::spawn_blocking(move || run_elevated(&installer, timeout))
            .await
            .context("installer worker")??;
        if exit_code != 0 {
            warn!(exit_code, "vJoy installer reported failure");
        }

        Ok(self.verify().await)
    }

    fn construct(&self, _identity: &DeviceIdentity) -> Result<Arc<dyn NativeDevice>> {
        let iface = Interface::load()?;
        if !iface.ready() {
            bail!("vJoy driver not ready");
        }
        let slot = (self.config.first_slot..=self.config.last_slot)
            .find(|&slot| iface.status(slot) == VJD_STAT_FREE)
            .ok_or_else(|| {
                anyhow!("no free vJoy slot in {}..={}", self.config.first_slot, self.config.last_slot)
            })?;

        if unsafe { (iface.acquire)(slot) } == 0 {
            bail!("AcquireVJD({slot}) failed");
        }
        unsafe { (iface.reset)(slot) };
        info!(slot, "acquired vJoy device");
        Ok(Arc::new(VJoyDevice { iface, slot, released: AtomicBool::new(false) }))
    }
}

/// `ShellExecuteEx` with the "runas" verb, then wait for the process.
fn run_elevated(program: &Path, timeout: Duration) -> Result<u32> {
    let file: Vec<u16> = program.as_os_str().encode_wide().chain(Some(0)).collect();
    let mut info = SHELLEXECUTEINFOW {
        cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
        fMask: SEE_MASK_NOCLOSEPROCESS,
        lpVerb: w!("runas"),
        lpFile: PCWSTR(file.as_ptr()),
        nShow: SW_HIDE.0,
        ..Default::default()
    };
    unsafe { ShellExecuteExW(&mut info) }.context("ShellExecuteExW")?;
    if info.hProcess.is_invalid() {
        bail!("installer did not start a process");
    }

    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    let waited = unsafe { WaitForSingleObject(info.hProcess, millis) };
    let mut code = 0u32;
    let exited = waited == WAIT_OBJECT_0
        && unsafe { GetExitCodeProcess(info.hProcess, &mut code) }.is_ok();
    let _ = unsafe { CloseHandle(info.hProcess) };
    if !exited {
        bail!("vJoy installer did not finish within {timeout:?}");
    }
    Ok(code)
}

struct VJoyDevice {
    iface: Arc<Interface>,
    slot: u32,
    released: AtomicBool,
}

#[async_trait::async_trait]
impl NativeDevice for VJoyDevice {
    async fn activate(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            bail!("vJoy slot {} released before activation", self.slot);
        }
        match self.iface.status(self.slot) {
            VJD_STAT_OWN => Ok(()),
            other => bail!("vJoy slot {} not owned (status {other})", self.slot),
        }
    }

    async fn dispatch(&self, report: Report) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            bail!("vJoy slot {} released", self.slot);
        }
        let mut position = JoystickPosition::from_report(self.slot, &report);
        if unsafe { (self.iface.update)(self.slot, &mut position) } == 0 {
            bail!("UpdateVJD({}) failed", self.slot);
        }
        Ok(())
    }

    fn teardown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        unsafe {
            (self.iface.reset)(self.slot);
            (self.iface.relinquish)(self.slot);
        }
        debug!(slot = self.slot, "relinquished vJoy device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_scaling_covers_vjoy_range() {
        assert_eq!(stick_to_vjoy(i16::MIN), 1);
        assert_eq!(stick_to_vjoy(0), 0x4001);
        assert_eq!(stick_to_vjoy(i16::MAX), 0x8000);
        assert_eq!(trigger_to_vjoy(0), 1);
        assert_eq!(trigger_to_vjoy(255), 0x8000);
    }

    #[test]
    fn position_follows_report_layout() {
        let report = Report::from([0x01, 0x00, 0x64, 0x00, 0x9C, 0xFF, 0, 0, 0, 0, 0xFF, 0x80]);
        let pos = JoystickPosition::from_report(1, &report);
        assert_eq!(pos.b_device, 1);
        assert_eq!(pos.l_buttons, 1);
        assert_eq!(pos.w_axis_x, stick_to_vjoy(100));
        assert_eq!(pos.w_axis_y, stick_to_vjoy(-100));
        assert_eq!(pos.w_axis_y_rot, 0x8000);
        assert_eq!(pos.w_axis_z_rot, trigger_to_vjoy(0x80));
        assert_eq!(pos.b_hats, HAT_NEUTRAL);
    }
}
