//! In-memory device registry for tests and local tooling.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::{DeviceIdentity, DeviceLifecycleState, DeviceSelector};

use super::errors::{RegistryError, RegistryResult};
use super::DeviceRegistryAdapter;

/// In-memory registry of device identities.
#[derive(Debug, Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<Vec<DeviceIdentity>>,
    vehicle_links: RwLock<HashMap<String, String>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a device identity.
    pub fn add_device(&self, device: DeviceIdentity) {
        self.devices
            .write()
            .expect("registry lock poisoned")
            .push(device);
    }

    /// Current state of a device, for assertions in tests.
    pub fn state_of(&self, serial_number: &str) -> Option<DeviceLifecycleState> {
        self.devices
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find(|d| d.serial_number == serial_number)
            .map(|d| d.state)
    }

    /// Current vehicle linkage of a device, for assertions in tests.
    pub fn vehicle_linkage(&self, serial_number: &str) -> Option<String> {
        self.vehicle_links
            .read()
            .expect("registry lock poisoned")
            .get(serial_number)
            .cloned()
    }
}

impl DeviceRegistryAdapter for InMemoryDeviceRegistry {
    fn lookup(&self, selector: &DeviceSelector) -> RegistryResult<Option<DeviceIdentity>> {
        let devices = self
            .devices
            .read()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
        let matches: Vec<&DeviceIdentity> =
            devices.iter().filter(|d| selector.matches(d)).collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0].clone())),
            n => Err(RegistryError::AmbiguousSelector { matches: n }),
        }
    }

    fn set_state(
        &self,
        serial_number: &str,
        new_state: DeviceLifecycleState,
        _reason: &str,
    ) -> RegistryResult<()> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
        let device = devices
            .iter_mut()
            .find(|d| d.serial_number == serial_number)
            .ok_or_else(|| RegistryError::UnknownDevice(serial_number.to_string()))?;
        device.state = new_state;
        Ok(())
    }

    fn update_vehicle_linkage(&self, serial_number: &str, vin: &str) -> RegistryResult<()> {
        let mut links = self
            .vehicle_links
            .write()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
        links.insert(serial_number.to_string(), vin.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_single_match() {
        let registry = InMemoryDeviceRegistry::new();
        registry.add_device(DeviceIdentity::provisioned("SN-1").with_imei("111"));
        registry.add_device(DeviceIdentity::provisioned("SN-2").with_imei("222"));

        let found = registry
            .lookup(&DeviceSelector::by_imei("111"))
            .unwrap()
            .unwrap();
        assert_eq!(found.serial_number, "SN-1");
    }

    #[test]
    fn test_lookup_no_match_is_none() {
        let registry = InMemoryDeviceRegistry::new();
        let found = registry.lookup(&DeviceSelector::by_serial("SN-X")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_ambiguous_lookup_is_error() {
        let registry = InMemoryDeviceRegistry::new();
        registry.add_device(DeviceIdentity::provisioned("SN-1").with_bssid("aa:bb"));
        registry.add_device(DeviceIdentity::provisioned("SN-2").with_bssid("aa:bb"));

        let err = registry
            .lookup(&DeviceSelector::by_bssid("aa:bb"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AmbiguousSelector { matches: 2 }));
    }

    #[test]
    fn test_set_state_transitions_device() {
        let registry = InMemoryDeviceRegistry::new();
        registry.add_device(DeviceIdentity::provisioned("SN-1"));

        registry
            .set_state("SN-1", DeviceLifecycleState::ReadyToActivate, "test")
            .unwrap();
        assert_eq!(
            registry.state_of("SN-1"),
            Some(DeviceLifecycleState::ReadyToActivate)
        );
    }

    #[test]
    fn test_set_state_unknown_device() {
        let registry = InMemoryDeviceRegistry::new();
        let err = registry
            .set_state("SN-X", DeviceLifecycleState::Active, "test")
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownDevice(_)));
    }
}
