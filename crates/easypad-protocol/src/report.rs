use crate::{Buttons, GamepadState};

/// 12-byte little-endian input report.
///
/// | bytes  | field                         |
/// |--------|-------------------------------|
/// | 0..2   | button bitmask                |
/// | 2..10  | LX, LY, RX, RY (i16 each)     |
/// | 10     | left trigger (u8)             |
/// | 11     | right trigger (u8)            |
///
/// Must stay in lockstep with [`REPORT_DESCRIPTOR`](crate::REPORT_DESCRIPTOR).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Report(pub [u8; Report::LEN]);

impl Report {
    pub const LEN: usize = 12;

    #[inline]
    pub fn as_bytes(&self) -> &[u8; Report::LEN] {
        &self.0
    }

    pub fn buttons(&self) -> Buttons {
        Buttons::from_bits_retain(u16::from_le_bytes([self.0[0], self.0[1]]))
    }

    /// Stick value by index (0 = LX .. 3 = RY).
    pub fn stick(&self, index: usize) -> Option<i16> {
        if index >= 4 {
            return None;
        }
        let at = 2 + index * 2;
        Some(i16::from_le_bytes([self.0[at], self.0[at + 1]]))
    }

    #[inline]
    pub fn left_trigger(&self) -> u8 {
        self.0[10]
    }

    #[inline]
    pub fn right_trigger(&self) -> u8 {
        self.0[11]
    }

    /// Lowercase hex, space separated.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
    }
}

impl From<[u8; Report::LEN]> for Report {
    fn from(data: [u8; Report::LEN]) -> Self {
        Report(data)
    }
}

/// Encode the full state. Triggers are already in their 8-bit form.
impl From<&GamepadState> for Report {
    fn from(s: &GamepadState) -> Self {
        let mut b = [0u8; Report::LEN];

        b[0..2].copy_from_slice(&s.buttons.bits().to_le_bytes());

        b[2..4].copy_from_slice(&s.lx.to_le_bytes());
        b[4..6].copy_from_slice(&s.ly.to_le_bytes());
        b[6..8].copy_from_slice(&s.rx.to_le_bytes());
        b[8..10].copy_from_slice(&s.ry.to_le_bytes());

        b[10] = s.lt;
        b[11] = s.rt;

        Report(b)
    }
}
