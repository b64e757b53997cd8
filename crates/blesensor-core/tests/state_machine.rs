//! Scenario tests for the sensor state machine.
//!
//! Every test drives a [`Sensor`] through the public API with a
//! [`MockGatt`] standing in for the connection manager and a
//! [`RecordingSink`] capturing what would be published.

use blesensor_core::uuids::{
    BATTERY_LEVEL, BATTERY_SERVICE, CHARACTERISTIC_USER_DESCRIPTION, TEMPERATURE,
};
use blesensor_core::{
    ConnectionId, ConnectionState, DisconnectReason, Fault, GattStatus, Measurement, MockGatt,
    NotReady, ProtocolEvent, RecordingSink, Sensor, SinkRecord, SourceConfig, SubmitError,
    ValueDecoder, ValueFormat,
};
use bytes::Bytes;

const CONN: ConnectionId = ConnectionId(1);

fn setup(config: SourceConfig) -> (Sensor<RecordingSink>, RecordingSink, MockGatt) {
    let gatt = MockGatt::battery();
    gatt.open(CONN);
    let sink = RecordingSink::new();
    (Sensor::new(config, sink.clone()), sink, gatt)
}

fn battery() -> SourceConfig {
    SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
        .name("Battery")
        .build()
}

fn discovery(connection: ConnectionId) -> ProtocolEvent {
    ProtocolEvent::DiscoveryComplete { connection }
}

fn closed(connection: ConnectionId) -> ProtocolEvent {
    ProtocolEvent::ConnectionClosed {
        connection,
        reason: DisconnectReason::RemoteRequest,
    }
}

fn read_ok(payload: &'static [u8]) -> ProtocolEvent {
    ProtocolEvent::ReadComplete {
        connection: CONN,
        handle: MockGatt::BATTERY_LEVEL_HANDLE,
        status: GattStatus::SUCCESS,
        payload: Bytes::from_static(payload),
    }
}

#[test]
fn test_poll_read_and_emit() {
    let (mut sensor, sink, gatt) = setup(battery());

    sensor.handle_event(
        &ProtocolEvent::ConnectionOpened {
            connection: CONN,
            status: GattStatus::SUCCESS,
        },
        &gatt,
    );
    sensor.handle_event(&discovery(CONN), &gatt);
    assert_eq!(sensor.source().state(), ConnectionState::Established);
    assert_eq!(sensor.source().handle(), Some(MockGatt::BATTERY_LEVEL_HANDLE));

    sensor.on_tick(&gatt).unwrap();
    assert_eq!(gatt.reads(), vec![(CONN, MockGatt::BATTERY_LEVEL_HANDLE)]);

    sensor.handle_event(&read_ok(&[0x2A]), &gatt);
    assert_eq!(sink.measurements(), vec![Measurement::Value(42.0)]);
    assert!(!sink.is_degraded());
}

#[test]
fn test_disconnect_while_subscription_pending() {
    let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
        .notify(true)
        .build();
    let (mut sensor, sink, gatt) = setup(config);

    sensor.handle_event(&discovery(CONN), &gatt);
    assert_eq!(sensor.source().state(), ConnectionState::SubscriptionPending);

    sensor.handle_event(&closed(CONN), &gatt);
    assert_eq!(sensor.source().state(), ConnectionState::Disconnected);
    assert_eq!(sensor.source().handle(), None);
    assert_eq!(sink.unavailable_count(), 1);
    assert!(sink.is_degraded());
}

#[test]
fn test_disconnect_emits_unavailable_exactly_once() {
    let (mut sensor, sink, gatt) = setup(battery());
    sensor.handle_event(&discovery(CONN), &gatt);
    sink.clear();

    sensor.handle_event(&closed(CONN), &gatt);
    let records = sink.records();
    assert_eq!(
        records,
        vec![
            SinkRecord::SetDegraded(Fault::LinkLost),
            SinkRecord::Emit(Measurement::Unavailable),
            SinkRecord::State(ConnectionState::Disconnected),
        ]
    );
}

#[test]
fn test_missing_characteristic_never_establishes() {
    let config = SourceConfig::builder(BATTERY_SERVICE, TEMPERATURE).build();
    let (mut sensor, sink, gatt) = setup(config);

    sensor.handle_event(&discovery(CONN), &gatt);
    assert_eq!(sink.unavailable_count(), 1);
    assert!(sink.is_degraded());

    // Nothing that follows on this connection makes the source ready.
    for _ in 0..3 {
        assert_eq!(sensor.on_tick(&gatt), Err(NotReady::NotEstablished));
    }
    sensor.handle_event(
        &ProtocolEvent::NotifyRegistered {
            connection: CONN,
            handle: None,
            status: GattStatus::SUCCESS,
        },
        &gatt,
    );
    assert_ne!(sensor.source().state(), ConnectionState::Established);
    assert_eq!(sink.unavailable_count(), 1);
    assert!(gatt.reads().is_empty());
}

#[test]
fn test_notify_disabled_skips_subscription() {
    let (mut sensor, _, gatt) = setup(battery());
    sensor.handle_event(&discovery(CONN), &gatt);
    assert_eq!(sensor.source().state(), ConnectionState::Established);
    assert!(gatt.subscriptions().is_empty());
}

#[test]
fn test_notifications_flow_after_registration() {
    let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
        .notify(true)
        .never_poll()
        .build();
    let (mut sensor, sink, gatt) = setup(config);

    sensor.handle_event(&discovery(CONN), &gatt);
    assert_eq!(gatt.subscriptions(), vec![(CONN, MockGatt::BATTERY_LEVEL_HANDLE)]);
    sensor.handle_event(
        &ProtocolEvent::NotifyRegistered {
            connection: CONN,
            handle: Some(MockGatt::BATTERY_LEVEL_HANDLE),
            status: GattStatus::SUCCESS,
        },
        &gatt,
    );
    assert_eq!(sensor.source().state(), ConnectionState::Established);

    for level in [90u8, 89, 88] {
        sensor.handle_event(
            &ProtocolEvent::Notification {
                connection: CONN,
                handle: MockGatt::BATTERY_LEVEL_HANDLE,
                payload: Bytes::from(vec![level]),
            },
            &gatt,
        );
    }
    assert_eq!(
        sink.measurements(),
        vec![
            Measurement::Value(90.0),
            Measurement::Value(89.0),
            Measurement::Value(88.0)
        ]
    );
}

#[test]
fn test_stale_completion_after_reconnect_is_ignored() {
    let (mut sensor, sink, gatt) = setup(battery());
    sensor.handle_event(&discovery(CONN), &gatt);
    sensor.on_tick(&gatt).unwrap();

    // The link drops and comes back before the read completes.
    sensor.handle_event(&closed(CONN), &gatt);
    let next = CONN.next();
    gatt.open(next);
    sensor.handle_event(&discovery(next), &gatt);
    sink.clear();

    sensor.handle_event(&read_ok(&[0x10]), &gatt);
    assert!(sink.records().is_empty());
    assert_eq!(sensor.source().state(), ConnectionState::Established);
}

#[test]
fn test_read_completion_clears_degraded() {
    let (mut sensor, sink, gatt) = setup(battery());
    sensor.handle_event(&discovery(CONN), &gatt);

    gatt.fail_reads(Some(SubmitError::QueueFull));
    sensor.on_tick(&gatt).unwrap();
    assert!(sink.is_degraded());

    gatt.fail_reads(None);
    sensor.on_tick(&gatt).unwrap();
    sensor.handle_event(&read_ok(&[55]), &gatt);
    assert!(!sink.is_degraded());
    assert_eq!(
        sink.measurements(),
        vec![Measurement::Unavailable, Measurement::Value(55.0)]
    );
}

#[test]
fn test_failed_read_completion_is_log_only() {
    let (mut sensor, sink, gatt) = setup(battery());
    sensor.handle_event(&discovery(CONN), &gatt);
    sink.clear();

    sensor.on_tick(&gatt).unwrap();
    sensor.handle_event(
        &ProtocolEvent::ReadComplete {
            connection: CONN,
            handle: MockGatt::BATTERY_LEVEL_HANDLE,
            status: GattStatus::INSUFFICIENT_AUTHENTICATION,
            payload: Bytes::new(),
        },
        &gatt,
    );
    assert!(sink.records().is_empty());
    assert_eq!(sensor.metrics().snapshot().read_errors, 1);
}

#[test]
fn test_descriptor_source_reads_descriptor_handle() {
    let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
        .descriptor(CHARACTERISTIC_USER_DESCRIPTION)
        .decoder(|data| data.len() as f32)
        .build();
    let (mut sensor, sink, gatt) = setup(config);
    sensor.handle_event(&discovery(CONN), &gatt);
    sensor.on_tick(&gatt).unwrap();
    assert_eq!(gatt.reads(), vec![(CONN, MockGatt::BATTERY_DESCRIPTION_HANDLE)]);

    sensor.handle_event(
        &ProtocolEvent::ReadComplete {
            connection: CONN,
            handle: MockGatt::BATTERY_DESCRIPTION_HANDLE,
            status: GattStatus::SUCCESS,
            payload: Bytes::from_static(b"Battery"),
        },
        &gatt,
    );
    assert_eq!(sink.measurements(), vec![Measurement::Value(7.0)]);
}

#[test]
fn test_configured_decoder() {
    let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
        .parser(ValueDecoder::new(ValueFormat::U16Le).scale(0.1))
        .build();
    let (mut sensor, sink, gatt) = setup(config);
    sensor.handle_event(&discovery(CONN), &gatt);
    sensor.handle_event(&read_ok(&[0xE8, 0x03]), &gatt);
    assert_eq!(sink.measurements(), vec![Measurement::Value(100.0)]);

    sensor.handle_event(&read_ok(&[0xE8]), &gatt);
    assert_eq!(sink.measurements()[1], Measurement::Unavailable);
}

#[test]
fn test_full_lifecycle_twice() {
    let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
        .notify(true)
        .build();
    let (mut sensor, sink, gatt) = setup(config);

    let mut connection = CONN;
    for round in 0..2u8 {
        sensor.handle_event(&discovery(connection), &gatt);
        sensor.handle_event(
            &ProtocolEvent::NotifyRegistered {
                connection,
                handle: Some(MockGatt::BATTERY_LEVEL_HANDLE),
                status: GattStatus::SUCCESS,
            },
            &gatt,
        );
        sensor.on_tick(&gatt).unwrap();
        sensor.handle_event(
            &ProtocolEvent::ReadComplete {
                connection,
                handle: MockGatt::BATTERY_LEVEL_HANDLE,
                status: GattStatus::SUCCESS,
                payload: Bytes::from(vec![round]),
            },
            &gatt,
        );
        sensor.handle_event(&closed(connection), &gatt);

        connection = connection.next();
        gatt.open(connection);
    }

    assert_eq!(
        sink.measurements(),
        vec![
            Measurement::Value(0.0),
            Measurement::Unavailable,
            Measurement::Value(1.0),
            Measurement::Unavailable
        ]
    );
    let snap = sensor.metrics().snapshot();
    assert_eq!(snap.link_losses, 2);
    assert_eq!(snap.reads_completed, 2);
    assert_eq!(gatt.subscriptions().len(), 2);
}
