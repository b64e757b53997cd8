//! Core value types shared by the state machine and its collaborators.

use std::fmt;
use std::num::NonZeroU16;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// A transport-assigned ATT attribute handle.
///
/// Handle `0x0000` is reserved by the ATT protocol, so a `Handle` is always
/// non-zero. An unresolved handle is modelled as `Option<Handle>`.
///
/// Handles are only meaningful for the connection that assigned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct Handle(NonZeroU16);

impl Handle {
    /// Create a handle, returning `None` for the reserved value 0.
    pub const fn new(raw: u16) -> Option<Self> {
        match NonZeroU16::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// The raw 16-bit handle value.
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl TryFrom<u16> for Handle {
    type Error = ParseError;

    fn try_from(raw: u16) -> ParseResult<Self> {
        Self::new(raw).ok_or(ParseError::InvalidHandle(raw))
    }
}

impl From<Handle> for u16 {
    fn from(handle: Handle) -> Self {
        handle.get()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.get())
    }
}

/// Identifier of one connection lifetime, assigned by the connection manager.
///
/// A new identifier is handed out for every (re)connection so completions
/// from a superseded connection can be told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectionId(pub u16);

impl ConnectionId {
    /// The identifier that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// ATT/GATT status code reported with a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GattStatus(pub u8);

impl GattStatus {
    /// The request completed successfully.
    pub const SUCCESS: Self = Self(0x00);
    /// The handle does not address an attribute.
    pub const INVALID_HANDLE: Self = Self(0x01);
    /// The attribute cannot be read.
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    /// The attribute requires authentication.
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x05);
    /// The server does not support the request.
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x06);
    /// The attribute requires encryption.
    pub const INSUFFICIENT_ENCRYPTION: Self = Self(0x0F);
    /// The local stack failed internally.
    pub const INTERNAL_ERROR: Self = Self(0x81);
    /// The local stack is busy with another request.
    pub const BUSY: Self = Self(0x84);
    /// Generic failure, also used when a request timed out.
    pub const ERROR: Self = Self(0x85);

    /// Whether the status reports success.
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "success",
            Self::INVALID_HANDLE => "invalid handle",
            Self::READ_NOT_PERMITTED => "read not permitted",
            Self::INSUFFICIENT_AUTHENTICATION => "insufficient authentication",
            Self::REQUEST_NOT_SUPPORTED => "request not supported",
            Self::INSUFFICIENT_ENCRYPTION => "insufficient encryption",
            Self::INTERNAL_ERROR => "internal error",
            Self::BUSY => "busy",
            Self::ERROR => "error",
            _ => return None,
        })
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "0x{:02X} ({})", self.0, name),
            None => write!(f, "0x{:02X}", self.0),
        }
    }
}

/// Readiness of a sensor source within one connection lifetime.
///
/// Transitions are monotonic for a connection:
/// `Discovering -> (SubscriptionPending ->)? Established`, and any state
/// falls back to `Disconnected` on link loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    /// No usable connection.
    #[default]
    Disconnected,
    /// Discovery finished and the handle is being resolved.
    Discovering,
    /// Waiting for the notification registration to complete.
    SubscriptionPending,
    /// The handle is resolved and reads may be issued.
    Established,
}

impl ConnectionState {
    /// Whether reads may be issued in this state.
    pub fn is_established(self) -> bool {
        self == Self::Established
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Disconnected => "disconnected",
            Self::Discovering => "discovering",
            Self::SubscriptionPending => "subscription pending",
            Self::Established => "established",
        };
        f.write_str(text)
    }
}

/// A value handed to the measurement sink.
///
/// `Unavailable` replaces a not-a-number sentinel so consumers cannot do
/// arithmetic on a missing value by accident.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Measurement {
    /// A decoded value.
    Value(f32),
    /// The source has no current value.
    Unavailable,
}

impl Measurement {
    /// Wrap a decoded float, mapping NaN and infinities to
    /// [`Measurement::Unavailable`].
    pub fn from_f32(value: f32) -> Self {
        if !value.is_finite() {
            Self::Unavailable
        } else {
            Self::Value(value)
        }
    }

    /// The value, if one is available.
    pub fn value(self) -> Option<f32> {
        match self {
            Self::Value(value) => Some(value),
            Self::Unavailable => None,
        }
    }

    /// Whether a value is available.
    pub fn is_available(self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// The value, or NaN when unavailable, for sinks that speak floats only.
    pub fn to_f32_or_nan(self) -> f32 {
        self.value().unwrap_or(f32::NAN)
    }
}

impl From<Option<f32>> for Measurement {
    fn from(value: Option<f32>) -> Self {
        value.map_or(Self::Unavailable, Self::from_f32)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{}", value),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}
