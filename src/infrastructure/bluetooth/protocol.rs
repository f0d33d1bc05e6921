//! Hotkey Peripheral Protocol
//!
//! Target identifiers and the 2-byte notification format sent by the
//! hotkey peripheral.

use crate::domain::errors::DecodeError;
use crate::domain::models::{DeviceIdentity, HotkeyEvent, ModifierFlags};
use tracing::trace;

/// Hardware address fragment identifying the target peripheral
pub const TARGET_DEVICE_ADDRESS: &str = "f0:5e:cd:48:9c:21";

/// Hotkey service UUID (matched by containment, lower-case)
pub const SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

/// Hotkey notification characteristic UUID (matched by containment, lower-case)
pub const HOTKEY_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Length of every hotkey notification
pub const PAYLOAD_LEN: usize = 2;

mod modifier_bits {
    pub const CTRL: u8 = 0x80;
    pub const SHIFT: u8 = 0x40;
    pub const ALT: u8 = 0x20;
    pub const WIN: u8 = 0x10;
}

/// Decode a hotkey notification
///
/// # Payload Structure (2 bytes)
///
/// ```text
/// [0] : Modifier byte
///       bit 7: Ctrl
///       bit 6: Shift
///       bit 5: Alt
///       bit 4: Win
///       bits 3-0: reserved
/// [1] : Virtual-key code, injected as-is (0 included)
/// ```
pub fn decode_payload(bytes: &[u8]) -> Result<HotkeyEvent, DecodeError> {
    let [modifier, key_code] = <[u8; PAYLOAD_LEN]>::try_from(bytes)
        .map_err(|_| DecodeError::MalformedPayload(bytes.len()))?;

    let modifiers = ModifierFlags {
        ctrl: modifier & modifier_bits::CTRL != 0,
        shift: modifier & modifier_bits::SHIFT != 0,
        alt: modifier & modifier_bits::ALT != 0,
        win: modifier & modifier_bits::WIN != 0,
    };
    trace!("Decoded {:02X?} -> {:?} key {:#04X}", bytes, modifiers, key_code);

    Ok(HotkeyEvent {
        modifiers,
        key_code,
    })
}

/// Case-insensitive containment match used for service and characteristic UUIDs
pub fn uuid_matches(uuid: &str, target: &str) -> bool {
    uuid.to_ascii_lowercase().contains(&target.to_ascii_lowercase())
}

/// Default auto-connect predicate: identity contains the target address fragment
pub fn is_target_device(device: &DeviceIdentity) -> bool {
    device
        .id
        .to_ascii_lowercase()
        .contains(TARGET_DEVICE_ADDRESS)
}

/// Upper-case hex dump used in status lines
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
