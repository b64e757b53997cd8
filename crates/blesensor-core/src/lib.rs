//! GATT interaction state machine for BLE sensor values.
//!
//! This crate turns one characteristic (or one descriptor) of a remote
//! Bluetooth Low Energy peripheral into a stream of numeric measurements.
//! Given a service UUID, a characteristic UUID and optionally a descriptor
//! UUID, a [`Source`] resolves the attribute handle after service discovery,
//! optionally registers for notifications, and reads the value whenever the
//! scheduler ticks.
//!
//! # Architecture
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Source`] | Pure state machine: protocol events and ticks in, [`Effect`]s out |
//! | [`Sensor`] | Applies effects to a [`GattClient`] and a [`MeasurementSink`] |
//! | [`Driver`] | Scheduler task: routes events to sensors, ticks them on their interval |
//! | [`BtleplugLink`] | Connection manager on top of btleplug, with reconnection |
//! | [`MockGatt`] | In-memory connection manager for tests |
//!
//! Everything the state machine knows about the outside world goes through
//! the collaborator traits in [`traits`], so it can be tested without a
//! radio.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use blesensor_core::{
//!     BtleplugLink, Driver, EventDispatcher, LinkOptions, ReconnectOptions, Sensor, SourceConfig,
//! };
//! use blesensor_core::uuids::{BATTERY_LEVEL, BATTERY_SERVICE};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (link, events) =
//!         BtleplugLink::spawn("AA:BB:CC:DD:EE:FF", LinkOptions::default(), ReconnectOptions::default())
//!             .await?;
//!
//!     let dispatcher = EventDispatcher::default();
//!     let mut rx = dispatcher.subscribe();
//!
//!     let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
//!         .name("Battery")
//!         .update_interval(Duration::from_secs(30))
//!         .build();
//!     let driver = Driver::new(link, events, CancellationToken::new())
//!         .with_sensor(Sensor::new(config, dispatcher.sink("Battery")))?;
//!     tokio::spawn(driver.run());
//!
//!     while let Ok(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod gatt;
pub mod link;
pub mod metrics;
pub mod mock;
pub mod parser;
pub mod protocol;
pub mod reconnect;
pub mod resolver;
pub mod scan;
pub mod sensor;
pub mod source;
pub mod traits;
pub mod util;

pub use config::{SourceConfig, SourceConfigBuilder};
pub use driver::Driver;
pub use error::{DeviceNotFoundReason, Error, Fault, NotReady, ResolveError, Result, SubmitError};
pub use events::{EventDispatcher, EventReceiver, EventSender, EventSink, SensorEvent};
pub use gatt::{CharacteristicInfo, DescriptorInfo, ServiceInfo, ServiceTree};
pub use link::{BtleplugLink, LinkOptions};
pub use metrics::{MetricsSnapshot, SourceMetrics};
pub use mock::{MockGatt, RecordingSink, SinkRecord, Submission};
pub use parser::{ValueDecoder, ValueFormat, ValueParser};
pub use protocol::{DisconnectReason, ProtocolEvent};
pub use reconnect::ReconnectOptions;
pub use resolver::{AttributeTarget, resolve};
pub use scan::ScanOptions;
pub use sensor::Sensor;
pub use source::{Effect, Source};
pub use traits::{GattClient, GattView, MeasurementSink};

// Re-export types for convenience
pub use blesensor_types::uuid as uuids;
pub use blesensor_types::{
    BleUuid, ConnectionId, ConnectionState, GattStatus, Handle, Measurement,
};
