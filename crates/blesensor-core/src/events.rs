//! Sensor event publication.
//!
//! [`EventSink`] is a [`MeasurementSink`] that turns everything a sensor
//! reports into timestamped [`SensorEvent`]s on a broadcast channel, so any
//! number of consumers (a printer, a logger, a UI) can follow all sources.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

use blesensor_types::{ConnectionState, Measurement};

use crate::error::Fault;
use crate::traits::MeasurementSink;

/// Events published for a source.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SensorEvent {
    /// A measurement or the unavailable marker.
    Measurement {
        /// Source name.
        source: String,
        /// The measurement.
        measurement: Measurement,
        /// When it was published.
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    /// The degraded-status flag changed.
    StatusChanged {
        /// Source name.
        source: String,
        /// Whether the source is now degraded.
        degraded: bool,
        /// Description of the fault that raised the flag.
        fault: Option<String>,
        /// When the flag changed.
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    /// The connection state of the source changed.
    StateChanged {
        /// Source name.
        source: String,
        /// The new state.
        state: ConnectionState,
        /// When the state changed.
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
}

impl SensorEvent {
    /// The source the event belongs to.
    pub fn source(&self) -> &str {
        match self {
            Self::Measurement { source, .. }
            | Self::StatusChanged { source, .. }
            | Self::StateChanged { source, .. } => source,
        }
    }

    /// When the event was published.
    pub fn at(&self) -> OffsetDateTime {
        match self {
            Self::Measurement { at, .. }
            | Self::StatusChanged { at, .. }
            | Self::StateChanged { at, .. } => *at,
        }
    }
}

/// Sender for sensor events.
pub type EventSender = broadcast::Sender<SensorEvent>;

/// Receiver for sensor events.
pub type EventReceiver = broadcast::Receiver<SensorEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SensorEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Create a sink that publishes on this dispatcher under `source`.
    pub fn sink(&self, source: impl Into<String>) -> EventSink {
        EventSink::new(source, self.clone())
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

/// A [`MeasurementSink`] that publishes [`SensorEvent`]s.
///
/// Status reports are edge-triggered: a `StatusChanged` event is only sent
/// when the flag or the fault text actually changes.
#[derive(Debug, Clone)]
pub struct EventSink {
    source: String,
    dispatcher: EventDispatcher,
    /// Text of the fault currently holding the flag, `None` while ok.
    fault: Option<String>,
}

impl EventSink {
    /// Create a sink for `source`.
    pub fn new(source: impl Into<String>, dispatcher: EventDispatcher) -> Self {
        Self {
            source: source.into(),
            dispatcher,
            fault: None,
        }
    }

    /// Whether the degraded flag is currently raised.
    pub fn is_degraded(&self) -> bool {
        self.fault.is_some()
    }
}

impl MeasurementSink for EventSink {
    fn emit(&mut self, measurement: Measurement) {
        self.dispatcher.send(SensorEvent::Measurement {
            source: self.source.clone(),
            measurement,
            at: OffsetDateTime::now_utc(),
        });
    }

    fn set_degraded(&mut self, fault: &Fault) {
        let text = fault.to_string();
        if self.fault.as_deref() == Some(text.as_str()) {
            return;
        }
        self.fault = Some(text.clone());
        self.dispatcher.send(SensorEvent::StatusChanged {
            source: self.source.clone(),
            degraded: true,
            fault: Some(text),
            at: OffsetDateTime::now_utc(),
        });
    }

    fn clear_degraded(&mut self) {
        if self.fault.take().is_none() {
            return;
        }
        self.dispatcher.send(SensorEvent::StatusChanged {
            source: self.source.clone(),
            degraded: false,
            fault: None,
            at: OffsetDateTime::now_utc(),
        });
    }

    fn state_changed(&mut self, state: ConnectionState) {
        self.dispatcher.send(SensorEvent::StateChanged {
            source: self.source.clone(),
            state,
            at: OffsetDateTime::now_utc(),
        });
    }
}
