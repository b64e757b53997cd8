//! Platform-agnostic types for BLE GATT sensor sources.
//!
//! This crate provides the value types shared by the GATT state machine in
//! `blesensor-core`, its collaborators and any front-end that consumes
//! measurements.
//!
//! # Features
//!
//! - [`BleUuid`] with 16/32/128-bit parsing against the Bluetooth base UUID
//! - Attribute [`Handle`]s and per-lifetime [`ConnectionId`]s
//! - The [`ConnectionState`] of a source and the [`Measurement`] it emits
//! - Error types for parsing
//!
//! # Example
//!
//! ```
//! use blesensor_types::{BleUuid, Handle, Measurement};
//!
//! let battery: BleUuid = "2A19".parse().unwrap();
//! assert_eq!(battery, blesensor_types::uuid::BATTERY_LEVEL);
//! assert!(Handle::new(0).is_none());
//! assert_eq!(Measurement::from_f32(f32::NAN), Measurement::Unavailable);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{ConnectionId, ConnectionState, GattStatus, Handle, Measurement};
pub use crate::uuid::BleUuid;
