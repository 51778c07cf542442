//! Runtime configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! `EASYPAD_BACKEND` overrides [`Config::backend`] after loading.
//!
//! ```toml
//! backend = "auto"
//! activation_timeout_ms = 5000
//!
//! [identity]
//! product = "Virtual Xbox 360 Controller"
//!
//! [vjoy]
//! installer = 'C:\tools\vjoy_driver\vJoyInstall.exe'
//! ```

use crate::error::{Error, Result};
use easypad_protocol::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const BACKEND_ENV: &str = "EASYPAD_BACKEND";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    /// Pick by target OS.
    #[default]
    Auto,
    MacHid,
    Vjoy,
    Uinput,
    Mock,
    Unsupported,
}

impl FromStr for BackendChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "mac-hid" | "machid" | "mac" => Ok(Self::MacHid),
            "vjoy" => Ok(Self::Vjoy),
            "uinput" => Ok(Self::Uinput),
            "mock" => Ok(Self::Mock),
            "unsupported" | "none" => Ok(Self::Unsupported),
            other => Err(Error::Config(format!("unknown backend {other:?}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendChoice,
    pub identity: DeviceIdentity,
    /// Upper bound on background activation; expiry counts as a failed activation.
    pub activation_timeout_ms: u64,
    pub mac: MacConfig,
    pub vjoy: VJoyConfig,
    pub uinput: UInputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            identity: DeviceIdentity::default(),
            activation_timeout_ms: 5_000,
            mac: MacConfig::default(),
            vjoy: VJoyConfig::default(),
            uinput: UInputConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file, then apply the environment override.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)?.with_env_override()
    }

    pub fn with_env_override(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            self.backend = value.parse()?;
        }
        Ok(self)
    }

    #[inline]
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacConfig {
    /// Minimum macOS version (major, minor) able to host user-space HID devices.
    pub min_os_version: (u32, u32),
}

impl Default for MacConfig {
    fn default() -> Self {
        Self { min_os_version: (10, 15) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VJoyConfig {
    /// Installer executable. Defaults to `vjoy_driver/vJoyInstall.exe` next to
    /// the running executable.
    pub installer: Option<PathBuf>,
    pub installer_timeout_secs: u64,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    /// vJoy device slots this process may acquire.
    pub first_slot: u32,
    pub last_slot: u32,
}

impl Default for VJoyConfig {
    fn default() -> Self {
        Self {
            installer: None,
            installer_timeout_secs: 300,
            verify_attempts: 10,
            verify_interval_ms: 500,
            first_slot: 1,
            last_slot: 16,
        }
    }
}

impl VJoyConfig {
    pub fn installer_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.installer {
            return Some(path.clone());
        }
        let exe = std::env::current_exe().ok()?;
        Some(exe.parent()?.join("vjoy_driver").join("vJoyInstall.exe"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UInputConfig {
    /// Candidate device nodes, tried in order.
    pub paths: Vec<PathBuf>,
    /// Time given to udev to publish the new node before the device counts as active.
    pub settle_ms: u64,
}

impl Default for UInputConfig {
    fn default() -> Self {
        Self {
            paths: vec!["/dev/uinput".into(), "/dev/input/uinput".into()],
            settle_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            backend = "mock"
            activation_timeout_ms = 250

            [identity]
            serial = "TEST-1"

            [vjoy]
            verify_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend, BackendChoice::Mock);
        assert_eq!(cfg.activation_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.identity.serial, "TEST-1");
        assert_eq!(cfg.identity.vendor_id, 0x045E);
        assert_eq!(cfg.vjoy.verify_attempts, 3);
        assert_eq!(cfg.vjoy.verify_interval_ms, 500);
        assert_eq!(cfg.uinput.settle_ms, 100);
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        assert!(matches!(Config::from_toml_str("backend = \"gpu\""), Err(Error::Config(_))));
        assert!(matches!("gpu".parse::<BackendChoice>(), Err(Error::Config(_))));
    }

    #[test]
    fn backend_choice_parses_aliases() {
        assert_eq!("Mac".parse::<BackendChoice>().unwrap(), BackendChoice::MacHid);
        assert_eq!(" vjoy ".parse::<BackendChoice>().unwrap(), BackendChoice::Vjoy);
        assert_eq!("none".parse::<BackendChoice>().unwrap(), BackendChoice::Unsupported);
    }

    #[test]
    fn explicit_installer_path_wins() {
        let cfg = VJoyConfig { installer: Some("C:/x/setup.exe".into()), ..Default::default() };
        assert_eq!(cfg.installer_path(), Some(PathBuf::from("C:/x/setup.exe")));
    }
}
