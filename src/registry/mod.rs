//! Device registry adapter.
//!
//! Read/write access to device identities and their manufacturing lifecycle
//! state. The registry owns device records; this crate only looks devices up
//! and requests transitions. The vehicle-registry linkage update consumed by
//! the replacement saga rides on the same adapter.

mod errors;
mod memory;

pub use errors::{RegistryError, RegistryResult};
pub use memory::InMemoryDeviceRegistry;

use crate::model::{DeviceIdentity, DeviceLifecycleState, DeviceSelector};

/// Device registry contract.
pub trait DeviceRegistryAdapter: Send + Sync {
    /// Resolve a selector to at most one device identity.
    ///
    /// Returns `Ok(None)` when nothing matches and an
    /// [`RegistryError::AmbiguousSelector`] error when more than one device
    /// matches.
    fn lookup(&self, selector: &DeviceSelector) -> RegistryResult<Option<DeviceIdentity>>;

    /// Request a lifecycle state transition for a device.
    fn set_state(
        &self,
        serial_number: &str,
        new_state: DeviceLifecycleState,
        reason: &str,
    ) -> RegistryResult<()>;

    /// Re-point the vehicle-registry linkage for a device.
    fn update_vehicle_linkage(&self, serial_number: &str, vin: &str) -> RegistryResult<()>;
}
