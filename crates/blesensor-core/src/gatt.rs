//! Discovered GATT attribute tree.
//!
//! A [`ServiceTree`] is the snapshot of services, characteristics and
//! descriptors a connection manager builds after discovery. It belongs to
//! one connection lifetime; sources only ever look things up in it and keep
//! the resolved [`Handle`], never the tree.

use serde::{Deserialize, Serialize};

use blesensor_types::{BleUuid, Handle};

/// A discovered descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInfo {
    /// Descriptor UUID.
    pub uuid: BleUuid,
    /// Attribute handle of the descriptor.
    pub handle: Handle,
}

/// A discovered characteristic and its descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    /// UUID of the owning service.
    pub service: BleUuid,
    /// Characteristic UUID.
    pub uuid: BleUuid,
    /// Attribute handle of the characteristic value.
    pub handle: Handle,
    /// Descriptors in discovery order.
    #[serde(default)]
    pub descriptors: Vec<DescriptorInfo>,
}

impl CharacteristicInfo {
    /// Find a descriptor of this characteristic by UUID.
    pub fn descriptor(&self, uuid: &BleUuid) -> Option<&DescriptorInfo> {
        self.descriptors.iter().find(|d| d.uuid == *uuid)
    }
}

/// A discovered primary service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: BleUuid,
    /// Characteristics in discovery order.
    #[serde(default)]
    pub characteristics: Vec<CharacteristicInfo>,
}

/// The attribute tree of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTree {
    services: Vec<ServiceInfo>,
}

impl ServiceTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tree from discovered services.
    pub fn from_services(services: Vec<ServiceInfo>) -> Self {
        Self { services }
    }

    /// The discovered services.
    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    /// Whether nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Find a characteristic by service and characteristic UUID.
    ///
    /// The first match in discovery order wins when a peripheral exposes the
    /// same service twice.
    pub fn characteristic(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
    ) -> Option<&CharacteristicInfo> {
        self.services
            .iter()
            .filter(|s| s.uuid == *service)
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == *characteristic)
    }

    /// Find the characteristic that owns a value or descriptor handle.
    pub fn owner_of(&self, handle: Handle) -> Option<&CharacteristicInfo> {
        self.characteristics()
            .find(|c| c.handle == handle || c.descriptors.iter().any(|d| d.handle == handle))
    }

    /// Whether any characteristic value or descriptor has this handle.
    pub fn contains(&self, handle: Handle) -> bool {
        self.owner_of(handle).is_some()
    }

    /// Iterate over all characteristics of all services.
    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicInfo> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }
}
