//! Conversion of raw attribute bytes into a measurement.
//!
//! Three kinds of parser are supported:
//!
//! | Parser | Behaviour |
//! |--------|-----------|
//! | [`ValueParser::FirstByte`] | First byte as an unsigned value (default) |
//! | [`ValueParser::Format`] | Fixed-width integer or float, then `value * scale + offset` |
//! | [`ValueParser::Custom`] | Any `Fn(&[u8]) -> f32` supplied by the application |
//!
//! Parsing never fails: a buffer that is too short, or a decoder whose
//! output is not finite (NaN or an infinity), yields
//! [`Measurement::Unavailable`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use tracing::warn;

use blesensor_types::Measurement;

use crate::error::Error;

/// Application-supplied decoder function.
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> f32 + Send + Sync>;

/// Fixed-width wire formats understood by [`ValueDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    /// Unsigned 8-bit.
    #[default]
    U8,
    /// Signed 8-bit.
    I8,
    /// Unsigned 16-bit, little-endian.
    U16Le,
    /// Unsigned 16-bit, big-endian.
    U16Be,
    /// Signed 16-bit, little-endian.
    I16Le,
    /// Signed 16-bit, big-endian.
    I16Be,
    /// Unsigned 32-bit, little-endian.
    U32Le,
    /// Unsigned 32-bit, big-endian.
    U32Be,
    /// Signed 32-bit, little-endian.
    I32Le,
    /// Signed 32-bit, big-endian.
    I32Be,
    /// IEEE-754 single precision, little-endian.
    F32Le,
    /// IEEE-754 single precision, big-endian.
    F32Be,
}

impl ValueFormat {
    /// All formats, in declaration order.
    pub const ALL: [ValueFormat; 12] = [
        Self::U8,
        Self::I8,
        Self::U16Le,
        Self::U16Be,
        Self::I16Le,
        Self::I16Be,
        Self::U32Le,
        Self::U32Be,
        Self::I32Le,
        Self::I32Be,
        Self::F32Le,
        Self::F32Be,
    ];

    /// Number of bytes the format consumes.
    pub fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16Le | Self::U16Be | Self::I16Le | Self::I16Be => 2,
            _ => 4,
        }
    }

    /// The configuration name of the format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16Le => "u16_le",
            Self::U16Be => "u16_be",
            Self::I16Le => "i16_le",
            Self::I16Be => "i16_be",
            Self::U32Le => "u32_le",
            Self::U32Be => "u32_be",
            Self::I32Le => "i32_le",
            Self::I32Be => "i32_be",
            Self::F32Le => "f32_le",
            Self::F32Be => "f32_be",
        }
    }

    /// Read one value from the start of `data`, or `None` if it is too short.
    pub fn read(self, mut data: &[u8]) -> Option<f64> {
        if data.len() < self.width() {
            return None;
        }
        let value = match self {
            Self::U8 => data.get_u8() as f64,
            Self::I8 => data.get_i8() as f64,
            Self::U16Le => data.get_u16_le() as f64,
            Self::U16Be => data.get_u16() as f64,
            Self::I16Le => data.get_i16_le() as f64,
            Self::I16Be => data.get_i16() as f64,
            Self::U32Le => data.get_u32_le() as f64,
            Self::U32Be => data.get_u32() as f64,
            Self::I32Le => data.get_i32_le() as f64,
            Self::I32Be => data.get_i32() as f64,
            Self::F32Le => data.get_f32_le() as f64,
            Self::F32Be => data.get_f32() as f64,
        };
        Some(value)
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| {
                Error::invalid_config(format!(
                    "unknown value format '{}' (expected one of: {})",
                    s,
                    Self::ALL.map(|f| f.as_str()).join(", ")
                ))
            })
    }
}

/// A fixed-width decoder with a linear transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueDecoder {
    /// Wire format of the value at the start of the buffer.
    pub format: ValueFormat,
    /// Multiplier applied to the raw value.
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Offset added after scaling.
    #[serde(default)]
    pub offset: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl ValueDecoder {
    /// Decoder for `format` with no scaling.
    pub fn new(format: ValueFormat) -> Self {
        Self {
            format,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Set the multiplier.
    #[must_use]
    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Set the offset.
    #[must_use]
    pub fn offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    /// Decode `data`, or `None` if the buffer is shorter than the format.
    pub fn decode(&self, data: &[u8]) -> Option<f32> {
        self.format
            .read(data)
            .map(|raw| (raw * self.scale as f64 + self.offset as f64) as f32)
    }
}

/// Converts a raw byte buffer into a [`Measurement`].
#[derive(Clone, Default)]
pub enum ValueParser {
    /// The first byte as an unsigned integer.
    #[default]
    FirstByte,
    /// A fixed-width decoder described by configuration.
    Format(ValueDecoder),
    /// An application-supplied decoder.
    Custom(DecodeFn),
}

impl ValueParser {
    /// Wrap a decoder closure.
    pub fn custom<F>(decode: F) -> Self
    where
        F: Fn(&[u8]) -> f32 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(decode))
    }

    /// Parse a buffer.
    ///
    /// A custom decoder always receives the whole buffer, including an empty
    /// one; what it returns is used verbatim unless it is not finite.
    pub fn parse(&self, data: &[u8]) -> Measurement {
        match self {
            Self::FirstByte => match data.first() {
                Some(&byte) => Measurement::Value(byte as f32),
                None => {
                    warn!("Received an empty value, reporting it as unavailable");
                    Measurement::Unavailable
                }
            },
            Self::Format(decoder) => match decoder.decode(data) {
                Some(value) => Measurement::from_f32(value),
                None => {
                    warn!(
                        "Received {} byte(s), format {} needs {}",
                        data.len(),
                        decoder.format,
                        decoder.format.width()
                    );
                    Measurement::Unavailable
                }
            },
            Self::Custom(decode) => Measurement::from_f32(decode(data)),
        }
    }
}

impl From<ValueDecoder> for ValueParser {
    fn from(decoder: ValueDecoder) -> Self {
        Self::Format(decoder)
    }
}

impl fmt::Debug for ValueParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstByte => f.write_str("FirstByte"),
            Self::Format(decoder) => f.debug_tuple("Format").field(decoder).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl fmt::Display for ValueParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstByte => f.write_str("first byte"),
            Self::Format(d) if d.scale == 1.0 && d.offset == 0.0 => write!(f, "{}", d.format),
            Self::Format(d) => write!(f, "{} * {} + {}", d.format, d.scale, d.offset),
            Self::Custom(_) => f.write_str("custom"),
        }
    }
}


/// Property-based tests for value parsing.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The default parser reports the first byte, zero-extended.
        #[test]
        fn first_byte_is_the_value(data in proptest::collection::vec(any::<u8>(), 1..32)) {
            prop_assert_eq!(ValueParser::FirstByte.parse(&data), Measurement::Value(data[0] as f32));
        }

        /// A custom decoder's result is passed through unchanged.
        #[test]
        fn custom_decoder_passes_through(data in proptest::collection::vec(any::<u8>(), 1..32)) {
            let decode = |d: &[u8]| d.iter().map(|&b| b as f32).sum::<f32>() / 3.0;
            let parser = ValueParser::custom(decode);
            prop_assert_eq!(parser.parse(&data), Measurement::Value(decode(&data)));
        }

        /// Fixed-width decoders never panic on arbitrary input.
        #[test]
        fn format_decode_never_panics(data: Vec<u8>, index in 0usize..12) {
            let _ = ValueParser::from(ValueDecoder::new(ValueFormat::ALL[index])).parse(&data);
        }
    }
}
