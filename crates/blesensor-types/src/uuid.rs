//! Bluetooth UUIDs for GATT services, characteristics and descriptors.
//!
//! GATT attributes are addressed by 16-bit, 32-bit or 128-bit UUIDs. The short
//! forms are aliases inside the Bluetooth base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`, so [`BleUuid`] always stores the
//! full 128-bit value and two spellings of the same attribute compare equal.
//!
//! ```
//! use blesensor_types::BleUuid;
//!
//! let short: BleUuid = "2A19".parse().unwrap();
//! let long: BleUuid = "00002a19-0000-1000-8000-00805f9b34fb".parse().unwrap();
//! assert_eq!(short, long);
//! assert_eq!(short.to_string(), "0x2A19");
//! ```

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{ParseError, ParseResult};

/// The Bluetooth base UUID, `00000000-0000-1000-8000-00805f9b34fb`.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Bits shared by every alias of the base UUID.
const BASE_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

/// A GATT attribute UUID stored in its canonical 128-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BleUuid(Uuid);

impl BleUuid {
    /// Expand a 16-bit SIG-assigned UUID.
    pub const fn from_u16(short: u16) -> Self {
        Self::from_u32(short as u32)
    }

    /// Expand a 32-bit SIG-assigned UUID.
    pub const fn from_u32(short: u32) -> Self {
        Self(Uuid::from_u128(BASE_UUID | ((short as u128) << 96)))
    }

    /// Create from a raw 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Wrap an existing [`Uuid`].
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The full 128-bit UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// The 16-bit or 32-bit alias, if this UUID lives inside the base UUID.
    pub fn short(&self) -> Option<u32> {
        let value = self.0.as_u128();
        (value & BASE_MASK == BASE_UUID).then_some((value >> 96) as u32)
    }

    /// Parse an optional UUID where an empty (or blank) string means "none".
    ///
    /// Configuration files leave the descriptor UUID empty when a source
    /// reads the characteristic value itself.
    pub fn parse_optional(s: &str) -> ParseResult<Option<Self>> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            trimmed.parse().map(Some)
        }
    }
}

impl FromStr for BleUuid {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let invalid = || ParseError::InvalidUuid(s.to_string());

        match digits.len() {
            4 | 8 => {
                if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(invalid());
                }
                let short = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
                Ok(Self::from_u32(short))
            }
            _ if digits.len() != trimmed.len() => Err(invalid()),
            _ => Uuid::parse_str(trimmed).map(Self).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.short() {
            Some(short) if short <= 0xFFFF => write!(f, "0x{:04X}", short),
            Some(short) => write!(f, "0x{:08X}", short),
            None => write!(f, "{}", self.0.hyphenated()),
        }
    }
}

impl From<Uuid> for BleUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<BleUuid> for Uuid {
    fn from(uuid: BleUuid) -> Self {
        uuid.0
    }
}

impl From<u16> for BleUuid {
    fn from(short: u16) -> Self {
        Self::from_u16(short)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for BleUuid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for BleUuid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// --- Standard GATT Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: BleUuid = BleUuid::from_u16(0x1800);

/// Device Information service.
pub const DEVICE_INFO_SERVICE: BleUuid = BleUuid::from_u16(0x180A);

/// Battery service.
pub const BATTERY_SERVICE: BleUuid = BleUuid::from_u16(0x180F);

/// Environmental Sensing service.
pub const ENVIRONMENTAL_SENSING_SERVICE: BleUuid = BleUuid::from_u16(0x181A);

// --- Standard GATT Characteristic UUIDs ---

/// Device name characteristic.
pub const DEVICE_NAME: BleUuid = BleUuid::from_u16(0x2A00);

/// Battery level characteristic (one unsigned byte, percent).
pub const BATTERY_LEVEL: BleUuid = BleUuid::from_u16(0x2A19);

/// Temperature characteristic (sint16, 0.01 °C).
pub const TEMPERATURE: BleUuid = BleUuid::from_u16(0x2A6E);

/// Humidity characteristic (uint16, 0.01 %).
pub const HUMIDITY: BleUuid = BleUuid::from_u16(0x2A6F);

/// Pressure characteristic (uint32, 0.1 Pa).
pub const PRESSURE: BleUuid = BleUuid::from_u16(0x2A6D);

// --- Standard GATT Descriptor UUIDs ---

/// Characteristic User Description descriptor.
pub const CHARACTERISTIC_USER_DESCRIPTION: BleUuid = BleUuid::from_u16(0x2901);

/// Client Characteristic Configuration descriptor (CCCD).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: BleUuid = BleUuid::from_u16(0x2902);

/// Characteristic Presentation Format descriptor.
pub const CHARACTERISTIC_PRESENTATION_FORMAT: BleUuid = BleUuid::from_u16(0x2904);
