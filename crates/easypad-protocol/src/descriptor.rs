//! Fixed HID report descriptor and identity registered at device construction.

use serde::{Deserialize, Serialize};

/// Gamepad report descriptor: 16 buttons, 4 × 16-bit signed axes, 2 × 8-bit triggers.
///
/// Never changes for the lifetime of a device; the layout is mirrored by
/// [`Report`](crate::Report).
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, //       Usage Page (Generic Desktop)
    0x09, 0x05, //       Usage (Game Pad)
    0xA1, 0x01, //       Collection (Application)
    0x05, 0x09, //         Usage Page (Button)
    0x19, 0x01, //         Usage Minimum (Button 1)
    0x29, 0x10, //         Usage Maximum (Button 16)
    0x15, 0x00, //         Logical Minimum (0)
    0x25, 0x01, //         Logical Maximum (1)
    0x75, 0x01, //         Report Size (1)
    0x95, 0x10, //         Report Count (16)
    0x81, 0x02, //         Input (Data, Variable, Absolute)
    0x05, 0x01, //         Usage Page (Generic Desktop)
    0x09, 0x30, //         Usage (X)
    0x09, 0x31, //         Usage (Y)
    0x09, 0x32, //         Usage (Z)
    0x09, 0x33, //         Usage (Rx)
    0x16, 0x00, 0x80, //   Logical Minimum (-32768)
    0x26, 0xFF, 0x7F, //   Logical Maximum (32767)
    0x75, 0x10, //         Report Size (16)
    0x95, 0x04, //         Report Count (4)
    0x81, 0x02, //         Input (Data, Variable, Absolute)
    0x05, 0x01, //         Usage Page (Generic Desktop)
    0x09, 0x34, //         Usage (Ry)
    0x09, 0x35, //         Usage (Rz)
    0x15, 0x00, //         Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //         Report Size (8)
    0x95, 0x02, //         Report Count (2)
    0x81, 0x02, //         Input (Data, Variable, Absolute)
    0xC0, //               End Collection
];

/// USB identity a virtual device presents to the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: String,
    pub manufacturer: String,
    pub serial: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_id: 0x045E,
            product_id: 0x028E,
            product: "Virtual Xbox 360 Controller".into(),
            manufacturer: "Microsoft".into(),
            serial: "EasyControl001".into(),
        }
    }
}

const ITEM_TYPE_MAIN: u8 = 0;
const ITEM_TYPE_GLOBAL: u8 = 1;
const TAG_MAIN_INPUT: u8 = 0x8;
const TAG_GLOBAL_REPORT_SIZE: u8 = 0x7;
const TAG_GLOBAL_REPORT_ID: u8 = 0x8;
const TAG_GLOBAL_REPORT_COUNT: u8 = 0x9;
const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Width in bits of the input report a descriptor declares.
///
/// Walks short items only; returns `None` on a long item, a truncated item,
/// or a descriptor that uses report IDs.
pub fn input_report_bits(descriptor: &[u8]) -> Option<u32> {
    let mut report_size = 0u32;
    let mut report_count = 0u32;
    let mut bits = 0u32;
    let mut at = 0usize;

    while at < descriptor.len() {
        let prefix = descriptor[at];
        if prefix == LONG_ITEM_PREFIX {
            return None;
        }
        let len = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let data = descriptor.get(at + 1..at + 1 + len)?;
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;

        match (item_type, tag) {
            (ITEM_TYPE_GLOBAL, TAG_GLOBAL_REPORT_SIZE) => report_size = value,
            (ITEM_TYPE_GLOBAL, TAG_GLOBAL_REPORT_COUNT) => report_count = value,
            (ITEM_TYPE_GLOBAL, TAG_GLOBAL_REPORT_ID) => return None,
            (ITEM_TYPE_MAIN, TAG_MAIN_INPUT) => bits += report_size * report_count,
            _ => {}
        }
        at += 1 + len;
    }
    Some(bits)
}
