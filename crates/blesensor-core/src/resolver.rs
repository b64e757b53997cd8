//! Resolution of the configured attribute to a protocol handle.

use blesensor_types::{BleUuid, Handle};

use crate::error::ResolveError;
use crate::traits::GattView;

/// The attribute a source operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeTarget<'a> {
    /// Service that contains the characteristic.
    pub service: &'a BleUuid,
    /// Characteristic to look up.
    pub characteristic: &'a BleUuid,
    /// Descriptor below the characteristic, if any.
    pub descriptor: Option<&'a BleUuid>,
}

/// Look up the target in the active connection's attribute tree.
///
/// Returns the descriptor's handle when a descriptor is configured and
/// present, otherwise the characteristic's value handle. The tree is only
/// borrowed for the duration of the call.
pub fn resolve<V>(target: AttributeTarget<'_>, view: &V) -> Result<Handle, ResolveError>
where
    V: GattView + ?Sized,
{
    let characteristic = view
        .find_characteristic(target.service, target.characteristic)
        .ok_or(ResolveError::CharacteristicNotFound {
            service: *target.service,
            characteristic: *target.characteristic,
        })?;

    let Some(descriptor) = target.descriptor else {
        return Ok(characteristic.handle);
    };

    view.find_descriptor(&characteristic, descriptor)
        .map(|d| d.handle)
        .ok_or(ResolveError::DescriptorNotFound {
            service: *target.service,
            characteristic: *target.characteristic,
            descriptor: *descriptor,
        })
}
