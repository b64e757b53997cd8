//! A source bound to its sink.
//!
//! [`Sensor`] carries out the [`Effect`]s of its [`Source`]: submissions go
//! to the [`GattClient`], measurements and status changes to the
//! [`MeasurementSink`]. A synchronous rejection is fed back into the source,
//! which may produce more effects, so effects are processed from a queue
//! until it drains.

use std::collections::VecDeque;
use std::sync::Arc;

use blesensor_types::ConnectionState;

use crate::config::SourceConfig;
use crate::error::{Fault, NotReady};
use crate::metrics::SourceMetrics;
use crate::protocol::ProtocolEvent;
use crate::source::{Effect, Source};
use crate::traits::{GattClient, MeasurementSink};

/// A value source together with its measurement sink and counters.
#[derive(Debug)]
pub struct Sensor<S> {
    source: Source,
    sink: S,
    metrics: Arc<SourceMetrics>,
}

impl<S: MeasurementSink> Sensor<S> {
    /// Create a sensor from a configuration and a sink.
    pub fn new(config: SourceConfig, sink: S) -> Self {
        Self {
            source: Source::new(config),
            sink,
            metrics: SourceMetrics::shared(),
        }
    }

    /// The underlying state machine.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// The source name.
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// The configuration.
    pub fn config(&self) -> &SourceConfig {
        self.source.config()
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Shared diagnostics counters.
    pub fn metrics(&self) -> Arc<SourceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Feed a protocol event to the source and carry out its effects.
    pub fn handle_event<C>(&mut self, event: &ProtocolEvent, client: &C)
    where
        C: GattClient + ?Sized,
    {
        let before = self.source.state();
        let effects = self.source.dispatch(event, client);

        match event {
            ProtocolEvent::ConnectionClosed { .. } => self.metrics.record_link_lost(),
            ProtocolEvent::ReadComplete { .. } if has_emit(&effects) => {
                self.metrics.record_read_completed()
            }
            ProtocolEvent::Notification { .. } if has_emit(&effects) => {
                self.metrics.record_notification()
            }
            _ => {}
        }

        self.apply(effects, client);
        self.report_state(before);
    }

    /// Scheduler tick: issue a read if the source is ready.
    ///
    /// Returns why no read was issued, for callers that care; the reason has
    /// already been logged.
    pub fn on_tick<C>(&mut self, client: &C) -> Result<(), NotReady>
    where
        C: GattClient + ?Sized,
    {
        let before = self.source.state();
        match self.source.poll(client) {
            Ok(effect) => {
                self.apply(vec![effect], client);
                self.report_state(before);
                Ok(())
            }
            Err(e) => {
                if e == NotReady::ReadInFlight {
                    self.metrics.record_read_skipped();
                }
                Err(e)
            }
        }
    }

    fn apply<C>(&mut self, effects: Vec<Effect>, client: &C)
    where
        C: GattClient + ?Sized,
    {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Emit(measurement) => {
                    self.metrics.record_emit(measurement.is_available());
                    self.sink.emit(measurement);
                }
                Effect::SetDegraded(fault) => self.sink.set_degraded(&fault),
                Effect::ClearDegraded => self.sink.clear_degraded(),
                Effect::Report(fault) => match fault {
                    Fault::ReadFailed { .. } => self.metrics.record_read_error(),
                    Fault::SubscribeRejected { .. } => self.metrics.record_subscribe_failure(),
                    _ => {}
                },
                Effect::Read { connection, handle } => {
                    match client.submit_read(connection, handle) {
                        Ok(()) => self.metrics.record_read_submitted(),
                        Err(e) => {
                            self.metrics.record_read_rejected();
                            queue.extend(self.source.read_rejected(handle, e));
                        }
                    }
                }
                Effect::Subscribe { connection, handle } => {
                    if let Err(e) = client.submit_subscribe(connection, handle) {
                        queue.extend(self.source.subscribe_rejected(handle, e));
                    }
                }
            }
        }
    }

    fn report_state(&mut self, before: ConnectionState) {
        let after = self.source.state();
        if after != before {
            self.sink.state_changed(after);
        }
    }
}

fn has_emit(effects: &[Effect]) -> bool {
    effects.iter().any(|e| matches!(e, Effect::Emit(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubmitError;
    use crate::mock::{MockGatt, RecordingSink, SinkRecord};
    use blesensor_types::uuid::{BATTERY_LEVEL, BATTERY_SERVICE};
    use blesensor_types::{ConnectionId, GattStatus, Measurement};
    use bytes::Bytes;

    const CONN: ConnectionId = ConnectionId(1);

    fn sensor(notify: bool) -> (Sensor<RecordingSink>, RecordingSink, MockGatt) {
        let gatt = MockGatt::battery();
        gatt.open(CONN);
        let sink = RecordingSink::new();
        let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
            .notify(notify)
            .build();
        (Sensor::new(config, sink.clone()), sink, gatt)
    }

    #[test]
    fn test_tick_submits_read() {
        let (mut sensor, _, gatt) = sensor(false);
        sensor.handle_event(&ProtocolEvent::DiscoveryComplete { connection: CONN }, &gatt);
        assert!(sensor.on_tick(&gatt).is_ok());
        assert_eq!(gatt.reads(), vec![(CONN, MockGatt::BATTERY_LEVEL_HANDLE)]);
        assert_eq!(sensor.metrics().snapshot().reads_submitted, 1);
    }

    #[test]
    fn test_rejected_read_degrades_immediately() {
        let (mut sensor, sink, gatt) = sensor(false);
        sensor.handle_event(&ProtocolEvent::DiscoveryComplete { connection: CONN }, &gatt);
        gatt.fail_reads(Some(SubmitError::QueueFull));

        assert!(sensor.on_tick(&gatt).is_ok());
        assert!(sink.is_degraded());
        assert_eq!(sink.measurements(), vec![Measurement::Unavailable]);
        assert_eq!(sensor.metrics().snapshot().reads_rejected, 1);
    }

    #[test]
    fn test_rejected_subscribe_still_establishes() {
        let (mut sensor, sink, gatt) = sensor(true);
        gatt.fail_subscribes(Some(SubmitError::QueueFull));
        sensor.handle_event(&ProtocolEvent::DiscoveryComplete { connection: CONN }, &gatt);

        assert_eq!(sensor.source().state(), ConnectionState::Established);
        assert!(!sink.is_degraded());
        assert_eq!(sink.records(), vec![SinkRecord::State(ConnectionState::Established)]);
        assert_eq!(sensor.metrics().snapshot().subscribe_failures, 1);
    }

    #[test]
    fn test_state_changes_are_reported() {
        let (mut sensor, sink, gatt) = sensor(true);
        sensor.handle_event(&ProtocolEvent::DiscoveryComplete { connection: CONN }, &gatt);
        sensor.handle_event(
            &ProtocolEvent::NotifyRegistered {
                connection: CONN,
                handle: Some(MockGatt::BATTERY_LEVEL_HANDLE),
                status: GattStatus::SUCCESS,
            },
            &gatt,
        );
        assert_eq!(
            sink.records(),
            vec![
                SinkRecord::State(ConnectionState::SubscriptionPending),
                SinkRecord::State(ConnectionState::Established),
            ]
        );
        assert_eq!(gatt.subscriptions(), vec![(CONN, MockGatt::BATTERY_LEVEL_HANDLE)]);
    }

    #[test]
    fn test_metrics_follow_events() {
        let (mut sensor, _, gatt) = sensor(true);
        sensor.handle_event(&ProtocolEvent::DiscoveryComplete { connection: CONN }, &gatt);
        sensor.handle_event(
            &ProtocolEvent::Notification {
                connection: CONN,
                handle: MockGatt::BATTERY_LEVEL_HANDLE,
                payload: Bytes::from_static(&[50]),
            },
            &gatt,
        );
        sensor.handle_event(
            &ProtocolEvent::ReadComplete {
                connection: CONN,
                handle: MockGatt::BATTERY_LEVEL_HANDLE,
                status: GattStatus::ERROR,
                payload: Bytes::new(),
            },
            &gatt,
        );
        let snap = sensor.metrics().snapshot();
        assert_eq!(snap.notifications, 1);
        assert_eq!(snap.read_errors, 1);
        assert_eq!(snap.values_emitted, 1);
    }

    #[test]
    fn test_skipped_reads_are_counted() {
        let gatt = MockGatt::battery();
        gatt.open(CONN);
        let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
            .dedupe_reads(true)
            .build();
        let mut sensor = Sensor::new(config, RecordingSink::new());
        sensor.handle_event(&ProtocolEvent::DiscoveryComplete { connection: CONN }, &gatt);
        assert!(sensor.on_tick(&gatt).is_ok());
        assert_eq!(sensor.on_tick(&gatt), Err(NotReady::ReadInFlight));
        assert_eq!(sensor.metrics().snapshot().reads_skipped, 1);
        assert_eq!(gatt.reads().len(), 1);
    }
}
