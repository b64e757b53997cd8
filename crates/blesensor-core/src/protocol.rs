//! Protocol events delivered by the connection manager.
//!
//! Every asynchronous outcome of the GATT transport reaches the state
//! machine as one [`ProtocolEvent`]. Events for one connection arrive in the
//! order the transport produced them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use blesensor_types::{ConnectionId, GattStatus, Handle};

/// Why a connection ended.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The local side closed the link.
    LocalRequest,
    /// The peripheral closed the link.
    RemoteRequest,
    /// The link supervision timeout expired.
    Timeout,
    /// The BLE stack reported an error.
    BleError(String),
    /// Unknown reason.
    Unknown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalRequest => write!(f, "closed locally"),
            Self::RemoteRequest => write!(f, "closed by peer"),
            Self::Timeout => write!(f, "supervision timeout"),
            Self::BleError(e) => write!(f, "BLE error: {}", e),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An asynchronous event from the GATT transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolEvent {
    /// A connection attempt finished.
    ConnectionOpened {
        /// The new connection.
        connection: ConnectionId,
        /// Outcome of the attempt.
        status: GattStatus,
    },
    /// A connection ended.
    ConnectionClosed {
        /// The connection that ended.
        connection: ConnectionId,
        /// Why it ended.
        reason: DisconnectReason,
    },
    /// The service tree of a connection is fully known.
    DiscoveryComplete {
        /// The connection that was discovered.
        connection: ConnectionId,
    },
    /// A read request finished.
    ReadComplete {
        /// Connection the read was issued on.
        connection: ConnectionId,
        /// Handle that was read.
        handle: Handle,
        /// Outcome of the read.
        status: GattStatus,
        /// Value bytes; empty unless `status` is success.
        payload: Bytes,
    },
    /// The peripheral pushed a value.
    Notification {
        /// Connection the value arrived on.
        connection: ConnectionId,
        /// Handle of the characteristic value.
        handle: Handle,
        /// Value bytes.
        payload: Bytes,
    },
    /// A notification registration finished.
    NotifyRegistered {
        /// Connection the registration was issued on.
        connection: ConnectionId,
        /// Handle the registration targeted, when the transport reports it.
        handle: Option<Handle>,
        /// Outcome of the registration.
        status: GattStatus,
    },
    /// A write request finished. Sensors never write, so this is not acted on.
    WriteComplete {
        /// Connection the write was issued on.
        connection: ConnectionId,
        /// Handle that was written.
        handle: Handle,
        /// Outcome of the write.
        status: GattStatus,
    },
    /// The ATT MTU changed.
    MtuChanged {
        /// Connection whose MTU changed.
        connection: ConnectionId,
        /// New MTU.
        mtu: u16,
    },
}

impl ProtocolEvent {
    /// The connection the event pertains to.
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::ConnectionOpened { connection, .. }
            | Self::ConnectionClosed { connection, .. }
            | Self::DiscoveryComplete { connection }
            | Self::ReadComplete { connection, .. }
            | Self::Notification { connection, .. }
            | Self::NotifyRegistered { connection, .. }
            | Self::WriteComplete { connection, .. }
            | Self::MtuChanged { connection, .. } => *connection,
        }
    }

    /// A short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionOpened { .. } => "connection_opened",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::DiscoveryComplete { .. } => "discovery_complete",
            Self::ReadComplete { .. } => "read_complete",
            Self::Notification { .. } => "notification",
            Self::NotifyRegistered { .. } => "notify_registered",
            Self::WriteComplete { .. } => "write_complete",
            Self::MtuChanged { .. } => "mtu_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_accessor() {
        let conn = ConnectionId(7);
        let events = [
            ProtocolEvent::ConnectionOpened {
                connection: conn,
                status: GattStatus::SUCCESS,
            },
            ProtocolEvent::DiscoveryComplete { connection: conn },
            ProtocolEvent::MtuChanged {
                connection: conn,
                mtu: 247,
            },
        ];
        for event in &events {
            assert_eq!(event.connection(), conn);
        }
    }

    #[test]
    fn test_kind_names() {
        let event = ProtocolEvent::Notification {
            connection: ConnectionId(1),
            handle: Handle::new(3).unwrap(),
            payload: Bytes::from_static(&[1]),
        };
        assert_eq!(event.kind(), "notification");
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::RemoteRequest.to_string(), "closed by peer");
        assert!(
            DisconnectReason::BleError("adapter gone".into())
                .to_string()
                .contains("adapter gone")
        );
    }
}
