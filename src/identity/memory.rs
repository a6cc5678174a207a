//! In-memory identity registry for tests and local tooling.
//!
//! Supports one-shot failure injection so fan-out and compensation paths
//! can be exercised.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use chrono::Utc;

use super::errors::{IdentityError, IdentityResult};
use super::{
    ActivationRecord, ActivationState, Credential, CredentialRegistration,
    IdentityRegistrationAdapter, RegistrationState,
};

/// In-memory identity registry.
#[derive(Debug, Default)]
pub struct InMemoryIdentityRegistry {
    registrations: RwLock<Vec<CredentialRegistration>>,
    activations: RwLock<Vec<ActivationRecord>>,
    register_calls: AtomicUsize,
    deregister_calls: AtomicUsize,
    fail_next_register: AtomicBool,
    fail_next_deregister: AtomicBool,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next register call fail once.
    pub fn fail_next_register(&self) {
        self.fail_next_register.store(true, Ordering::SeqCst);
    }

    /// Make the next deregister call fail once.
    pub fn fail_next_deregister(&self) {
        self.fail_next_deregister.store(true, Ordering::SeqCst);
    }

    /// Number of successful register calls.
    pub fn register_count(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Number of successful deregister calls.
    pub fn deregister_count(&self) -> usize {
        self.deregister_calls.load(Ordering::SeqCst)
    }

    /// Activation record for a device, for assertions in tests.
    pub fn activation_for(&self, serial_number: &str) -> Option<ActivationRecord> {
        self.activations
            .read()
            .expect("identity lock poisoned")
            .iter()
            .rev()
            .find(|a| a.serial_number == serial_number)
            .cloned()
    }
}

impl IdentityRegistrationAdapter for InMemoryIdentityRegistry {
    fn register(
        &self,
        device_id: &str,
        credential: &Credential,
    ) -> IdentityResult<CredentialRegistration> {
        if self.fail_next_register.swap(false, Ordering::SeqCst) {
            return Err(IdentityError::Unavailable(
                "injected register failure".to_string(),
            ));
        }
        let mut registrations = self
            .registrations
            .write()
            .map_err(|_| IdentityError::Unavailable("identity lock poisoned".to_string()))?;
        if registrations
            .iter()
            .any(|r| r.device_id == device_id && r.state == RegistrationState::Registered)
        {
            return Err(IdentityError::AlreadyRegistered(device_id.to_string()));
        }
        let registration = CredentialRegistration {
            device_id: device_id.to_string(),
            credential_id: credential.id.clone(),
            fingerprint: credential.fingerprint(),
            kind: credential.kind,
            state: RegistrationState::Registered,
            registered_at: Utc::now(),
            deregistered_at: None,
        };
        registrations.push(registration.clone());
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(registration)
    }

    fn deregister(&self, device_id: &str) -> IdentityResult<()> {
        if self.fail_next_deregister.swap(false, Ordering::SeqCst) {
            return Err(IdentityError::Unavailable(
                "injected deregister failure".to_string(),
            ));
        }
        let mut registrations = self
            .registrations
            .write()
            .map_err(|_| IdentityError::Unavailable("identity lock poisoned".to_string()))?;
        let active = registrations
            .iter_mut()
            .find(|r| r.device_id == device_id && r.state == RegistrationState::Registered)
            .ok_or_else(|| IdentityError::NotRegistered(device_id.to_string()))?;
        active.state = RegistrationState::Deregistered;
        active.deregistered_at = Some(Utc::now());
        self.deregister_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn active_registration(
        &self,
        device_id: &str,
    ) -> IdentityResult<Option<CredentialRegistration>> {
        let registrations = self
            .registrations
            .read()
            .map_err(|_| IdentityError::Unavailable("identity lock poisoned".to_string()))?;
        Ok(registrations
            .iter()
            .find(|r| r.device_id == device_id && r.state == RegistrationState::Registered)
            .cloned())
    }

    fn create_activation(&self, serial_number: &str) -> IdentityResult<ActivationRecord> {
        let mut activations = self
            .activations
            .write()
            .map_err(|_| IdentityError::Unavailable("identity lock poisoned".to_string()))?;
        let now = Utc::now();
        let record = ActivationRecord {
            serial_number: serial_number.to_string(),
            state: ActivationState::Ready,
            created_at: now,
            updated_at: now,
        };
        activations.push(record.clone());
        Ok(record)
    }

    fn complete_activation(&self, serial_number: &str) -> IdentityResult<()> {
        self.transition_activation(serial_number, ActivationState::Completed)
    }

    fn disable_activation(&self, serial_number: &str) -> IdentityResult<()> {
        self.transition_activation(serial_number, ActivationState::Disabled)
    }
}

impl InMemoryIdentityRegistry {
    fn transition_activation(
        &self,
        serial_number: &str,
        new_state: ActivationState,
    ) -> IdentityResult<()> {
        let mut activations = self
            .activations
            .write()
            .map_err(|_| IdentityError::Unavailable("identity lock poisoned".to_string()))?;
        if let Some(record) = activations
            .iter_mut()
            .rev()
            .find(|a| a.serial_number == serial_number && a.state == ActivationState::Ready)
        {
            record.state = new_state;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}
