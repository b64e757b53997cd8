//! The scheduler: one task that feeds protocol events and poll ticks to
//! every sensor of a link.
//!
//! All state-machine work happens on this task, one event or tick at a
//! time, so sources need no locking.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::ProtocolEvent;
use crate::sensor::Sensor;
use crate::traits::{GattClient, MeasurementSink};

struct Scheduled<S> {
    sensor: Sensor<S>,
    next_poll: Option<Instant>,
}

/// Drives a set of sensors that share one connection.
pub struct Driver<C, S> {
    client: C,
    events: mpsc::Receiver<ProtocolEvent>,
    cancel: CancellationToken,
    sensors: Vec<Scheduled<S>>,
}

impl<C, S> Driver<C, S>
where
    C: GattClient,
    S: MeasurementSink,
{
    /// Create a driver for a connection manager and its event stream.
    pub fn new(client: C, events: mpsc::Receiver<ProtocolEvent>, cancel: CancellationToken) -> Self {
        Self {
            client,
            events,
            cancel,
            sensors: Vec::new(),
        }
    }

    /// Add a sensor; its configuration must be valid.
    pub fn add_sensor(&mut self, sensor: Sensor<S>) -> Result<()> {
        sensor.config().validate()?;
        if self.sensors.iter().any(|s| s.sensor.name() == sensor.name()) {
            return Err(Error::invalid_config(format!(
                "duplicate sensor name '{}'",
                sensor.name()
            )));
        }
        self.sensors.push(Scheduled {
            sensor,
            next_poll: None,
        });
        Ok(())
    }

    /// Builder-style [`Driver::add_sensor`].
    pub fn with_sensor(mut self, sensor: Sensor<S>) -> Result<Self> {
        self.add_sensor(sensor)?;
        Ok(self)
    }

    /// The sensors, in the order they were added.
    pub fn sensors(&self) -> impl Iterator<Item = &Sensor<S>> {
        self.sensors.iter().map(|s| &s.sensor)
    }

    /// The connection manager.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run until cancelled or until the event channel closes.
    ///
    /// Hands back the connection manager, so the caller can shut it down
    /// cleanly, and the sensors, so their final state can be inspected.
    pub async fn run(mut self) -> (C, Vec<Sensor<S>>) {
        let start = Instant::now();
        for scheduled in &mut self.sensors {
            scheduled.sensor.config().log_config();
            scheduled.next_poll = scheduled
                .sensor
                .config()
                .update_interval
                .map(|interval| start + interval);
        }
        info!("Driving {} sensor(s)", self.sensors.len());

        loop {
            let next_poll = self.sensors.iter().filter_map(|s| s.next_poll).min();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Driver cancelled");
                    break;
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!("Event channel closed");
                        break;
                    };
                    self.dispatch(&event);
                }
                _ = wait_until(next_poll) => self.tick(Instant::now()),
            }
        }

        let sensors = self.sensors.into_iter().map(|s| s.sensor).collect();
        (self.client, sensors)
    }

    fn dispatch(&mut self, event: &ProtocolEvent) {
        debug!(kind = event.kind(), connection = %event.connection(), "Protocol event");
        for scheduled in &mut self.sensors {
            scheduled.sensor.handle_event(event, &self.client);
        }
    }

    fn tick(&mut self, now: Instant) {
        for scheduled in &mut self.sensors {
            let (Some(due), Some(interval)) = (
                scheduled.next_poll,
                scheduled.sensor.config().update_interval,
            ) else {
                continue;
            };
            if due > now {
                continue;
            }
            // The outcome is logged by the source.
            let _ = scheduled.sensor.on_tick(&self.client);
            scheduled.next_poll = Some(next_deadline(due, interval, now));
        }
    }
}

/// The next deadline after `due`, skipping ticks that were missed entirely.
fn next_deadline(due: Instant, interval: Duration, now: Instant) -> Instant {
    let next = due + interval;
    if next <= now { now + interval } else { next }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use blesensor_types::uuid::{BATTERY_LEVEL, BATTERY_SERVICE};
    use blesensor_types::{ConnectionId, GattStatus, Measurement};
    use bytes::Bytes;

    use crate::config::SourceConfig;
    use crate::mock::{MockGatt, RecordingSink};

    const CONN: ConnectionId = ConnectionId(1);

    fn battery_sensor(name: &str, interval: Option<Duration>) -> (Sensor<RecordingSink>, RecordingSink) {
        let builder = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL).name(name);
        let config = match interval {
            Some(interval) => builder.update_interval(interval),
            None => builder.never_poll().notify(true),
        }
        .build();
        let sink = RecordingSink::new();
        (Sensor::new(config, sink.clone()), sink)
    }

    #[test]
    fn test_next_deadline() {
        let now = Instant::now();
        let interval = Duration::from_secs(10);
        assert_eq!(next_deadline(now, interval, now), now + interval);
        let late = now + Duration::from_secs(35);
        assert_eq!(next_deadline(now, interval, late), late + interval);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let (_tx, rx) = mpsc::channel(4);
        let mut driver = Driver::new(MockGatt::battery(), rx, CancellationToken::new());
        driver.add_sensor(battery_sensor("a", Some(Duration::from_secs(1))).0).unwrap();
        assert!(driver.add_sensor(battery_sensor("a", Some(Duration::from_secs(1))).0).is_err());
        assert_eq!(driver.sensors().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval_once_established() {
        let gatt = Arc::new(MockGatt::battery());
        gatt.open(CONN);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (sensor, _) = battery_sensor("battery", Some(Duration::from_secs(10)));
        let driver = Driver::new(Arc::clone(&gatt), rx, cancel.clone())
            .with_sensor(sensor)
            .unwrap();
        let task = tokio::spawn(driver.run());

        tx.send(ProtocolEvent::DiscoveryComplete { connection: CONN })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(gatt.reads().len(), 3);

        cancel.cancel();
        let (_, sensors) = task.await.unwrap();
        assert_eq!(sensors[0].metrics().snapshot().reads_submitted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_the_client() {
        let gatt = Arc::new(MockGatt::battery());
        gatt.open(CONN);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (sensor, _) = battery_sensor("battery", Some(Duration::from_secs(10)));
        let driver = Driver::new(Arc::clone(&gatt), rx, cancel.clone())
            .with_sensor(sensor)
            .unwrap();
        let task = tokio::spawn(driver.run());

        tx.send(ProtocolEvent::DiscoveryComplete { connection: CONN })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        cancel.cancel();
        let (client, sensors) = task.await.unwrap();
        assert!(Arc::ptr_eq(&client, &gatt));
        assert_eq!(client.reads().len(), 1);
        assert_eq!(sensors.len(), 1);
        assert_eq!(Arc::strong_count(&gatt), 2);
        drop(client);
        assert_eq!(Arc::strong_count(&gatt), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensors_keep_their_own_schedule() {
        let gatt = Arc::new(MockGatt::battery());
        gatt.open(CONN);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (fast, _) = battery_sensor("fast", Some(Duration::from_secs(5)));
        let (slow, _) = battery_sensor("slow", Some(Duration::from_secs(20)));
        let (pushed, _) = battery_sensor("pushed", None);
        let driver = Driver::new(Arc::clone(&gatt), rx, cancel.clone())
            .with_sensor(fast)
            .and_then(|d| d.with_sensor(slow))
            .and_then(|d| d.with_sensor(pushed))
            .unwrap();
        let task = tokio::spawn(driver.run());

        tx.send(ProtocolEvent::DiscoveryComplete { connection: CONN })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(21)).await;

        cancel.cancel();
        let (_, sensors) = task.await.unwrap();
        let submitted: Vec<u64> = sensors
            .iter()
            .map(|s| s.metrics().snapshot().reads_submitted)
            .collect();
        assert_eq!(submitted, vec![4, 1, 0]);
        assert_eq!(gatt.subscriptions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_every_sensor() {
        let gatt = Arc::new(MockGatt::battery());
        gatt.open(CONN);
        let (tx, rx) = mpsc::channel(16);
        let (a, sink_a) = battery_sensor("a", Some(Duration::from_secs(60)));
        let (b, sink_b) = battery_sensor("b", Some(Duration::from_secs(60)));
        let driver = Driver::new(Arc::clone(&gatt), rx, CancellationToken::new())
            .with_sensor(a)
            .and_then(|d| d.with_sensor(b))
            .unwrap();
        let task = tokio::spawn(driver.run());

        tx.send(ProtocolEvent::DiscoveryComplete { connection: CONN })
            .await
            .unwrap();
        tx.send(ProtocolEvent::ReadComplete {
            connection: CONN,
            handle: MockGatt::BATTERY_LEVEL_HANDLE,
            status: GattStatus::SUCCESS,
            payload: Bytes::from_static(&[77]),
        })
        .await
        .unwrap();
        drop(tx);

        let (_, sensors) = task.await.unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sink_a.measurements(), vec![Measurement::Value(77.0)]);
        assert_eq!(sink_b.measurements(), vec![Measurement::Value(77.0)]);
    }
}
