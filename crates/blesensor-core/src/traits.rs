//! Collaborator interfaces of the sensor state machine.
//!
//! The state machine talks to exactly two outside parties:
//!
//! - the connection manager, which owns the link and the discovered
//!   attribute tree ([`GattView`] for lookups, [`GattClient`] for request
//!   submission), and
//! - the measurement sink that receives values and the degraded flag
//!   ([`MeasurementSink`]).
//!
//! Both are plain synchronous traits: submissions are fire-and-forget and
//! their outcome arrives later as a [`ProtocolEvent`](crate::ProtocolEvent).

use std::sync::Arc;

use blesensor_types::{BleUuid, ConnectionId, ConnectionState, Handle, Measurement};

use crate::error::{Fault, SubmitError};
use crate::gatt::{CharacteristicInfo, DescriptorInfo};

/// Read-only view of the connection manager's current link.
///
/// Implementations hand out clones of attribute records so no borrow of the
/// manager's tree outlives a single call.
pub trait GattView {
    /// The identifier of the current connection, if one is open.
    fn active_connection(&self) -> Option<ConnectionId>;

    /// Whether the physical link is up.
    fn is_link_established(&self) -> bool;

    /// Look up a characteristic in the active connection's attribute tree.
    fn find_characteristic(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
    ) -> Option<CharacteristicInfo>;

    /// Look up a descriptor below a characteristic.
    ///
    /// The default implementation searches the descriptors recorded on
    /// `characteristic`.
    fn find_descriptor(
        &self,
        characteristic: &CharacteristicInfo,
        descriptor: &BleUuid,
    ) -> Option<DescriptorInfo> {
        characteristic.descriptor(descriptor).cloned()
    }
}

/// Request submission on top of [`GattView`].
///
/// Both calls return as soon as the request is queued; an `Err` means the
/// transport refused it synchronously and no completion event will follow.
pub trait GattClient: GattView {
    /// Queue a read of `handle` on `connection`.
    fn submit_read(&self, connection: ConnectionId, handle: Handle) -> Result<(), SubmitError>;

    /// Queue a notification registration for `handle` on `connection`.
    fn submit_subscribe(
        &self,
        connection: ConnectionId,
        handle: Handle,
    ) -> Result<(), SubmitError>;
}

/// Downstream consumer of measurements.
pub trait MeasurementSink {
    /// Publish a measurement or the unavailable marker.
    fn emit(&mut self, measurement: Measurement);

    /// Raise the degraded-status flag.
    fn set_degraded(&mut self, fault: &Fault);

    /// Clear the degraded-status flag.
    fn clear_degraded(&mut self);

    /// The source moved to a new connection state. Ignored by default.
    fn state_changed(&mut self, _state: ConnectionState) {}
}

impl<T: GattView + ?Sized> GattView for &T {
    fn active_connection(&self) -> Option<ConnectionId> {
        (**self).active_connection()
    }

    fn is_link_established(&self) -> bool {
        (**self).is_link_established()
    }

    fn find_characteristic(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
    ) -> Option<CharacteristicInfo> {
        (**self).find_characteristic(service, characteristic)
    }

    fn find_descriptor(
        &self,
        characteristic: &CharacteristicInfo,
        descriptor: &BleUuid,
    ) -> Option<DescriptorInfo> {
        (**self).find_descriptor(characteristic, descriptor)
    }
}

impl<T: GattClient + ?Sized> GattClient for &T {
    fn submit_read(&self, connection: ConnectionId, handle: Handle) -> Result<(), SubmitError> {
        (**self).submit_read(connection, handle)
    }

    fn submit_subscribe(
        &self,
        connection: ConnectionId,
        handle: Handle,
    ) -> Result<(), SubmitError> {
        (**self).submit_subscribe(connection, handle)
    }
}

impl<T: MeasurementSink + ?Sized> MeasurementSink for Box<T> {
    fn emit(&mut self, measurement: Measurement) {
        (**self).emit(measurement)
    }

    fn set_degraded(&mut self, fault: &Fault) {
        (**self).set_degraded(fault)
    }

    fn clear_degraded(&mut self) {
        (**self).clear_degraded()
    }

    fn state_changed(&mut self, state: ConnectionState) {
        (**self).state_changed(state)
    }
}

impl<T: GattView + ?Sized> GattView for Arc<T> {
    fn active_connection(&self) -> Option<ConnectionId> {
        (**self).active_connection()
    }

    fn is_link_established(&self) -> bool {
        (**self).is_link_established()
    }

    fn find_characteristic(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
    ) -> Option<CharacteristicInfo> {
        (**self).find_characteristic(service, characteristic)
    }

    fn find_descriptor(
        &self,
        characteristic: &CharacteristicInfo,
        descriptor: &BleUuid,
    ) -> Option<DescriptorInfo> {
        (**self).find_descriptor(characteristic, descriptor)
    }
}

impl<T: GattClient + ?Sized> GattClient for Arc<T> {
    fn submit_read(&self, connection: ConnectionId, handle: Handle) -> Result<(), SubmitError> {
        (**self).submit_read(connection, handle)
    }

    fn submit_subscribe(
        &self,
        connection: ConnectionId,
        handle: Handle,
    ) -> Result<(), SubmitError> {
        (**self).submit_subscribe(connection, handle)
    }
}
