//! Bluetooth UUIDs for GATT command targets.
//!
//! Standard and vendor 16-bit identifiers are expanded onto the Bluetooth
//! base UUID `0000XXXX-0000-1000-8000-00805F9B34FB`.

use uuid::{Uuid, uuid};

use crate::error::{ParseError, ParseResult};

/// The Bluetooth base UUID that 16-bit identifiers are expanded onto.
pub const BLUETOOTH_BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

const SHORT_MASK: u128 = 0xFFFF_FFFF << 96;

/// Expand a 16-bit identifier onto the Bluetooth base UUID.
///
/// # Examples
///
/// ```
/// use blecmd_types::uuid::{from_short, MACHINE_SERVICE};
///
/// assert_eq!(from_short(0xA000), MACHINE_SERVICE);
/// ```
#[must_use]
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// Return the 16-bit identifier if `uuid` sits on the Bluetooth base UUID.
#[must_use]
pub fn to_short(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !SHORT_MASK != BLUETOOTH_BASE_UUID.as_u128() {
        return None;
    }
    let prefix = (value >> 96) as u32;
    u16::try_from(prefix).ok()
}

/// Parse a UUID given either in full form or as a 16-bit short form.
///
/// Accepted short forms are `A002`, `0xA002` and `0XA002`.
pub fn parse_uuid(input: &str) -> ParseResult<Uuid> {
    let trimmed = input.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if short.len() <= 4 && !short.is_empty() {
        return u16::from_str_radix(short, 16)
            .map(from_short)
            .map_err(|_| ParseError::InvalidUuid(input.to_string()));
    }

    Uuid::parse_str(trimmed).map_err(|_| ParseError::InvalidUuid(input.to_string()))
}

// --- Espresso machine service ---

/// Primary espresso machine service.
pub const MACHINE_SERVICE: Uuid = from_short(0xA000);

/// Firmware version characteristic.
pub const MACHINE_VERSION: Uuid = from_short(0xA001);

/// Requested state characteristic. Writing a state byte here asks the
/// machine to move to that state.
pub const MACHINE_REQUESTED_STATE: Uuid = from_short(0xA002);

/// Machine state notification characteristic.
pub const MACHINE_STATE_INFO: Uuid = from_short(0xA00E);

/// Requested-state value that puts the machine to sleep.
pub const MACHINE_STATE_SLEEP: u8 = 0x00;

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");
