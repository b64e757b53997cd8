//! Error types for blesensor-core.
//!
//! Two families of errors live here:
//!
//! - [`Error`] is returned by fallible set-up work: finding and connecting to
//!   a peripheral, validating options, spawning the driver.
//! - [`Fault`] and its parts ([`ResolveError`], [`SubmitError`], [`NotReady`])
//!   describe what went wrong for a sensor source at runtime. The state machine
//!   never returns them to a caller; they are logged and surfaced through the
//!   degraded-status flag of the measurement sink.
//!
//! # Runtime Fault Handling
//!
//! | Fault | Recovery | Surfaced as |
//! |-------|----------|-------------|
//! | [`Fault::LinkLost`] | Next connection restarts discovery | degraded + unavailable |
//! | [`Fault::Resolve`] | Only a new connection lifetime | degraded + unavailable |
//! | [`Fault::ReadRejected`] | Next poll retries | degraded + unavailable |
//! | [`Fault::ReadFailed`] | Next poll retries | log only |
//! | [`Fault::SubscribeRejected`] | None, source still becomes ready | log only |
//!
//! [`NotReady`] is not a protocol failure: it guards polls issued before the
//! source has a handle and is only logged.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use blesensor_types::{BleUuid, ConnectionId, GattStatus, Handle};

/// Errors that can occur while setting up or driving a sensor link.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during scan or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected to a device.
    #[error("Not connected to device")]
    NotConnected,

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse an identifier.
    #[error(transparent)]
    Parse(#[from] blesensor_types::ParseError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified name/address not found.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using blesensor-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to locate the configured attribute after service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ResolveError {
    /// No characteristic with this UUID inside this service.
    #[error("No sensor characteristic found at service {service} char {characteristic}")]
    CharacteristicNotFound {
        /// Service that was searched.
        service: BleUuid,
        /// Characteristic that was not found.
        characteristic: BleUuid,
    },

    /// The characteristic exists but has no descriptor with this UUID.
    #[error(
        "No sensor descriptor found at service {service} char {characteristic} descr {descriptor}"
    )]
    DescriptorNotFound {
        /// Service that was searched.
        service: BleUuid,
        /// Characteristic that owns the descriptor.
        characteristic: BleUuid,
        /// Descriptor that was not found.
        descriptor: BleUuid,
    },
}

/// Synchronous rejection of a read or subscribe submission by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SubmitError {
    /// The transport's request queue is full.
    #[error("request queue full")]
    QueueFull,
    /// There is no connection to submit on.
    #[error("not connected")]
    NotConnected,
    /// The request names a connection that is no longer active.
    #[error("{0} is not the active connection")]
    StaleConnection(ConnectionId),
    /// The handle does not address a discovered attribute.
    #[error("unknown handle {0}")]
    UnknownHandle(Handle),
    /// The transport refused the request with a status code.
    #[error("rejected with status {0}")]
    Rejected(GattStatus),
}

/// Why a poll was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum NotReady {
    /// The source has not reached the established state.
    #[error("Cannot poll, not connected")]
    NotEstablished,
    /// No characteristic or descriptor handle was resolved.
    #[error("Cannot poll, no characteristic/descriptor found")]
    NoHandle,
    /// The connection manager reports no active link.
    #[error("Cannot poll, link is down")]
    LinkDown,
    /// A previous read is still outstanding and duplicate reads are suppressed.
    #[error("Skipping poll, a read is already in flight")]
    ReadInFlight,
}

/// A runtime fault of a sensor source, attached to degraded-status reports.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Fault {
    /// The connection was closed.
    #[error("link lost")]
    LinkLost,

    /// The configured attribute could not be resolved after discovery.
    #[error(transparent)]
    Resolve {
        /// The underlying resolution failure.
        #[from]
        source: ResolveError,
    },

    /// A read request was rejected at submission.
    #[error("Error sending read request for handle {handle}: {source}")]
    ReadRejected {
        /// Handle the read targeted.
        handle: Handle,
        /// Why the transport rejected it.
        source: SubmitError,
    },

    /// A read request completed with a non-success status.
    #[error("Error reading char at handle {handle}, status={status}")]
    ReadFailed {
        /// Handle the read targeted.
        handle: Handle,
        /// Status reported by the peer or the stack.
        status: GattStatus,
    },

    /// A subscribe request was rejected at submission.
    #[error("Notification registration for handle {handle} failed: {source}")]
    SubscribeRejected {
        /// Handle the subscription targeted.
        handle: Handle,
        /// Why the transport rejected it.
        source: SubmitError,
    },
}
