//! Error types for parsing in blesensor-types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers used by a sensor source.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in blesensor-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The text is not a 16-bit, 32-bit or 128-bit UUID.
    #[error("Invalid UUID: '{0}'")]
    InvalidUuid(String),

    /// Attribute handle 0 is reserved and never addresses an attribute.
    #[error("Invalid attribute handle: {0}")]
    InvalidHandle(u16),
}

/// Result type alias using blesensor-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
