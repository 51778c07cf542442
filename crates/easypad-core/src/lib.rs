//! Virtual gamepads registered with the host OS input stack.
//!
//! A [`Registry`] owns every live device behind a [`DeviceId`]. Devices are
//! constructed by a platform [`Backend`](backend::Backend), activated in the
//! background, and fed full 12-byte reports on every state change.
//! [`Gamepads`] wraps the registry with the boolean control API.

pub mod activation;
pub mod api;
pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod registry;

pub use activation::Lifecycle;
pub use api::Gamepads;
pub use config::{BackendChoice, Config};
pub use device::VirtualDevice;
pub use error::{Error, IndexKind, Result};
pub use registry::Registry;

pub use easypad_protocol::{Axis, Buttons, DeviceId, GamepadState, Report};
