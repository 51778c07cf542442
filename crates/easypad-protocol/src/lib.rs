//! Wire-level types: device handles, button/axis indices, gamepad state.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod descriptor;
pub mod report;

pub use descriptor::{DeviceIdentity, REPORT_DESCRIPTOR};
pub use report::Report;

/// Number of addressable buttons (`0..BUTTON_COUNT`).
pub const BUTTON_COUNT: usize = 16;
/// Number of addressable axes: four sticks then two triggers.
pub const AXIS_COUNT: usize = 6;

/// Opaque process-wide handle of a virtual gamepad.
///
/// Allocated monotonically from 1 and never reused while the process runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    /// Button bitmask, bit `n` is button index `n`.
    ///
    /// The names follow the Xbox 360 layout the report descriptor advertises.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Buttons: u16 {
        const A           = 1 << 0;
        const B           = 1 << 1;
        const X           = 1 << 2;
        const Y           = 1 << 3;
        const LB          = 1 << 4;
        const RB          = 1 << 5;
        const LT_CLICK    = 1 << 6;
        const RT_CLICK    = 1 << 7;
        const BACK        = 1 << 8;
        const START       = 1 << 9;
        const LEFT_THUMB  = 1 << 10;
        const RIGHT_THUMB = 1 << 11;
        const DPAD_UP     = 1 << 12;
        const DPAD_DOWN   = 1 << 13;
        const DPAD_LEFT   = 1 << 14;
        const DPAD_RIGHT  = 1 << 15;
    }
}

impl Buttons {
    /// Single-bit mask for a button index, `None` when out of range.
    pub fn from_index(index: usize) -> Option<Self> {
        (index < BUTTON_COUNT).then(|| Self::from_bits_retain(1 << index))
    }
}

impl Default for Buttons {
    fn default() -> Self {
        Self::empty()
    }
}

/// Analog channels, in report order.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    LeftX = 0,
    LeftY = 1,
    RightX = 2,
    RightY = 3,
    LeftTrigger = 4,
    RightTrigger = 5,
}

impl Axis {
    pub const ALL: [Axis; AXIS_COUNT] = [
        Axis::LeftX,
        Axis::LeftY,
        Axis::RightX,
        Axis::RightY,
        Axis::LeftTrigger,
        Axis::RightTrigger,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn is_trigger(self) -> bool {
        matches!(self, Axis::LeftTrigger | Axis::RightTrigger)
    }
}

/// Remap a signed 16-bit axis value onto the unsigned 8-bit trigger range.
///
/// `clamp(round((value + 32768) / 256), 0, 255)`, rounding halves up.
pub fn trigger_from_axis(value: i16) -> u8 {
    let shifted = i32::from(value) + 32768;
    ((shifted + 128) / 256).clamp(0, 255) as u8
}

const _: [(); 12] = [(); std::mem::size_of::<GamepadState>()];
const _: [(); 2] = [(); std::mem::align_of::<GamepadState>()];

/// Full controller state. Reports always carry all of it, never a delta.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamepadState {
    pub buttons: Buttons,
    pub lx: i16,
    pub ly: i16,
    pub rx: i16,
    pub ry: i16,
    pub lt: u8,
    pub rt: u8,
}

impl GamepadState {
    pub fn set_button(&mut self, button: Buttons, pressed: bool) {
        self.buttons.set(button, pressed);
    }

    /// Store an axis value; triggers are remapped with [`trigger_from_axis`].
    pub fn set_axis(&mut self, axis: Axis, value: i16) {
        match axis {
            Axis::LeftX => self.lx = value,
            Axis::LeftY => self.ly = value,
            Axis::RightX => self.rx = value,
            Axis::RightY => self.ry = value,
            Axis::LeftTrigger => self.lt = trigger_from_axis(value),
            Axis::RightTrigger => self.rt = trigger_from_axis(value),
        }
    }

    #[inline]
    pub fn sticks(&self) -> [i16; 4] {
        [self.lx, self.ly, self.rx, self.ry]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_index_space_is_sixteen_bits() {
        assert_eq!(Buttons::from_index(0), Some(Buttons::A));
        assert_eq!(Buttons::from_index(9), Some(Buttons::START));
        assert_eq!(Buttons::from_index(15), Some(Buttons::DPAD_RIGHT));
        assert_eq!(Buttons::from_index(16), None);
        assert_eq!(Buttons::all().bits(), u16::MAX);
    }

    #[test]
    fn axis_index_space_is_six() {
        assert_eq!(Axis::from_index(0), Some(Axis::LeftX));
        assert_eq!(Axis::from_index(5), Some(Axis::RightTrigger));
        assert_eq!(Axis::from_index(6), None);
        assert!(Axis::LeftTrigger.is_trigger());
        assert!(!Axis::RightY.is_trigger());
    }

    #[test]
    fn trigger_remap_endpoints() {
        assert_eq!(trigger_from_axis(i16::MIN), 0);
        assert_eq!(trigger_from_axis(0), 128);
        assert_eq!(trigger_from_axis(i16::MAX), 255);
        // (-32640 + 32768) / 256 = 0.5 rounds up
        assert_eq!(trigger_from_axis(-32640), 1);
        assert_eq!(trigger_from_axis(-32641), 0);
    }

    #[test]
    fn sticks_are_stored_verbatim() {
        let mut s = GamepadState::default();
        s.set_axis(Axis::LeftX, -32768);
        s.set_axis(Axis::RightY, 1234);
        s.set_axis(Axis::LeftTrigger, i16::MAX);
        assert_eq!(s.sticks(), [-32768, 0, 0, 1234]);
        assert_eq!(s.lt, 255);
        assert_eq!(s.rt, 0);
    }

    #[test]
    fn duplicate_press_is_idempotent() {
        let mut s = GamepadState::default();
        s.set_button(Buttons::B, true);
        s.set_button(Buttons::B, true);
        assert_eq!(s.buttons, Buttons::B);
        s.set_button(Buttons::B, false);
        s.set_button(Buttons::B, false);
        assert!(s.buttons.is_empty());
    }

    #[test]
    fn device_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&DeviceId(7)).unwrap(), "7");
    }
}
