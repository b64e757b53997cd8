//! Mock collaborators for testing.
//!
//! [`MockGatt`] stands in for the connection manager: it holds an attribute
//! tree and an active connection, records every submitted request and can
//! be told to reject submissions. [`RecordingSink`] records everything a
//! sensor publishes.
//!
//! # Example
//!
//! ```
//! use blesensor_core::uuids::{BATTERY_LEVEL, BATTERY_SERVICE};
//! use blesensor_core::{ConnectionId, ConnectionState, MockGatt, ProtocolEvent, Source, SourceConfig};
//!
//! let gatt = MockGatt::battery();
//! gatt.open(ConnectionId(1));
//!
//! let mut source = Source::new(SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL).build());
//! source.dispatch(&ProtocolEvent::DiscoveryComplete { connection: ConnectionId(1) }, &gatt);
//! assert_eq!(source.state(), ConnectionState::Established);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use blesensor_types::uuid::{
    BATTERY_LEVEL, BATTERY_SERVICE, CHARACTERISTIC_USER_DESCRIPTION,
    CLIENT_CHARACTERISTIC_CONFIGURATION,
};
use blesensor_types::{BleUuid, ConnectionId, ConnectionState, Handle, Measurement};

use crate::error::{Fault, SubmitError};
use crate::gatt::{CharacteristicInfo, DescriptorInfo, ServiceInfo, ServiceTree};
use crate::traits::{GattClient, GattView, MeasurementSink};

/// A request recorded by [`MockGatt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A read was queued.
    Read(ConnectionId, Handle),
    /// A notification registration was queued.
    Subscribe(ConnectionId, Handle),
}

#[derive(Debug, Default)]
struct MockState {
    tree: ServiceTree,
    active: Option<ConnectionId>,
    link_established: bool,
    submissions: Vec<Submission>,
    read_failure: Option<SubmitError>,
    subscribe_failure: Option<SubmitError>,
}

/// An in-memory connection manager.
#[derive(Debug, Default)]
pub struct MockGatt {
    state: Mutex<MockState>,
}

const fn handle(raw: u16) -> Handle {
    match Handle::new(raw) {
        Some(h) => h,
        None => panic!("handle must be non-zero"),
    }
}

impl MockGatt {
    /// Value handle of the battery level characteristic in [`MockGatt::battery`].
    pub const BATTERY_LEVEL_HANDLE: Handle = handle(3);
    /// Handle of its client characteristic configuration descriptor.
    pub const BATTERY_CCCD_HANDLE: Handle = handle(4);
    /// Handle of its user description descriptor.
    pub const BATTERY_DESCRIPTION_HANDLE: Handle = handle(5);

    /// A manager with an empty tree and no connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager whose tree is a Battery Service with one level
    /// characteristic (handles 1..=5).
    pub fn battery() -> Self {
        Self::with_tree(Self::battery_tree())
    }

    /// The tree used by [`MockGatt::battery`].
    pub fn battery_tree() -> ServiceTree {
        ServiceTree::from_services(vec![ServiceInfo {
            uuid: BATTERY_SERVICE,
            characteristics: vec![CharacteristicInfo {
                service: BATTERY_SERVICE,
                uuid: BATTERY_LEVEL,
                handle: Self::BATTERY_LEVEL_HANDLE,
                descriptors: vec![
                    DescriptorInfo {
                        uuid: CLIENT_CHARACTERISTIC_CONFIGURATION,
                        handle: Self::BATTERY_CCCD_HANDLE,
                    },
                    DescriptorInfo {
                        uuid: CHARACTERISTIC_USER_DESCRIPTION,
                        handle: Self::BATTERY_DESCRIPTION_HANDLE,
                    },
                ],
            }],
        }])
    }

    /// A manager with the given tree and no connection.
    pub fn with_tree(tree: ServiceTree) -> Self {
        Self {
            state: Mutex::new(MockState {
                tree,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the attribute tree.
    pub fn set_tree(&self, tree: ServiceTree) {
        self.lock().tree = tree;
    }

    /// Make `connection` the active, established connection.
    pub fn open(&self, connection: ConnectionId) {
        let mut state = self.lock();
        state.active = Some(connection);
        state.link_established = true;
    }

    /// Drop the active connection.
    pub fn close(&self) {
        let mut state = self.lock();
        state.active = None;
        state.link_established = false;
    }

    /// Override the link-established flag without touching the connection.
    pub fn set_link_established(&self, established: bool) {
        self.lock().link_established = established;
    }

    /// Reject every read submission with `error`, or accept again with `None`.
    pub fn fail_reads(&self, error: Option<SubmitError>) {
        self.lock().read_failure = error;
    }

    /// Reject every subscribe submission with `error`, or accept again with `None`.
    pub fn fail_subscribes(&self, error: Option<SubmitError>) {
        self.lock().subscribe_failure = error;
    }

    /// All accepted submissions, oldest first.
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    /// Accepted reads, oldest first.
    pub fn reads(&self) -> Vec<(ConnectionId, Handle)> {
        self.lock()
            .submissions
            .iter()
            .filter_map(|s| match *s {
                Submission::Read(c, h) => Some((c, h)),
                Submission::Subscribe(..) => None,
            })
            .collect()
    }

    /// Accepted subscriptions, oldest first.
    pub fn subscriptions(&self) -> Vec<(ConnectionId, Handle)> {
        self.lock()
            .submissions
            .iter()
            .filter_map(|s| match *s {
                Submission::Subscribe(c, h) => Some((c, h)),
                Submission::Read(..) => None,
            })
            .collect()
    }

    /// Forget recorded submissions.
    pub fn clear_submissions(&self) {
        self.lock().submissions.clear();
    }

    fn check(
        state: &MockState,
        connection: ConnectionId,
        handle: Handle,
    ) -> Result<(), SubmitError> {
        match state.active {
            None => Err(SubmitError::NotConnected),
            Some(active) if active != connection => Err(SubmitError::StaleConnection(connection)),
            Some(_) if !state.tree.contains(handle) => Err(SubmitError::UnknownHandle(handle)),
            Some(_) => Ok(()),
        }
    }
}

impl GattView for MockGatt {
    fn active_connection(&self) -> Option<ConnectionId> {
        self.lock().active
    }

    fn is_link_established(&self) -> bool {
        self.lock().link_established
    }

    fn find_characteristic(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
    ) -> Option<CharacteristicInfo> {
        self.lock().tree.characteristic(service, characteristic).cloned()
    }
}

impl GattClient for MockGatt {
    fn submit_read(&self, connection: ConnectionId, handle: Handle) -> Result<(), SubmitError> {
        let mut state = self.lock();
        Self::check(&state, connection, handle)?;
        if let Some(error) = state.read_failure.clone() {
            return Err(error);
        }
        state.submissions.push(Submission::Read(connection, handle));
        Ok(())
    }

    fn submit_subscribe(
        &self,
        connection: ConnectionId,
        handle: Handle,
    ) -> Result<(), SubmitError> {
        let mut state = self.lock();
        Self::check(&state, connection, handle)?;
        if let Some(error) = state.subscribe_failure.clone() {
            return Err(error);
        }
        state.submissions.push(Submission::Subscribe(connection, handle));
        Ok(())
    }
}

/// Something a [`RecordingSink`] received.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    /// A measurement.
    Emit(Measurement),
    /// The degraded flag was raised.
    SetDegraded(Fault),
    /// The degraded flag was cleared.
    ClearDegraded,
    /// The connection state changed.
    State(ConnectionState),
}

/// A [`MeasurementSink`] that records every call.
///
/// Clones share the same record, so a test can keep one clone and hand the
/// other to a sensor.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<SinkRecord>>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<SinkRecord> {
        self.lock().clone()
    }

    /// Emitted measurements, oldest first.
    pub fn measurements(&self) -> Vec<Measurement> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                SinkRecord::Emit(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    /// Number of unavailable markers emitted.
    pub fn unavailable_count(&self) -> usize {
        self.measurements()
            .iter()
            .filter(|m| !m.is_available())
            .count()
    }

    /// Whether the last status call raised the degraded flag.
    pub fn is_degraded(&self) -> bool {
        self.lock()
            .iter()
            .rev()
            .find_map(|r| match r {
                SinkRecord::SetDegraded(_) => Some(true),
                SinkRecord::ClearDegraded => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl MeasurementSink for RecordingSink {
    fn emit(&mut self, measurement: Measurement) {
        self.lock().push(SinkRecord::Emit(measurement));
    }

    fn set_degraded(&mut self, fault: &Fault) {
        self.lock().push(SinkRecord::SetDegraded(fault.clone()));
    }

    fn clear_degraded(&mut self) {
        self.lock().push(SinkRecord::ClearDegraded);
    }

    fn state_changed(&mut self, state: ConnectionState) {
        self.lock().push(SinkRecord::State(state));
    }
}
