//! Identity registration adapter.
//!
//! The external identity system owns device network credentials. This crate
//! only requests register/deregister and never assumes local knowledge of
//! the external state. The activation records consumed by the replacement
//! saga live on the same adapter: associate creates an activation-ready
//! record, activation completes it, replacement disables the old one.

mod credential;
mod errors;
mod memory;

pub use credential::{fingerprint, fingerprints_match, Credential, CredentialType};
pub use errors::{IdentityError, IdentityResult};
pub use memory::InMemoryIdentityRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a credential registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationState {
    Registered,
    Deregistered,
}

/// A device's credential registration as seen by the identity system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRegistration {
    /// Device/credential id the registration is keyed by.
    pub device_id: String,
    /// Credential id of the registered material.
    pub credential_id: String,
    /// Fingerprint of the secret; the raw secret is never stored.
    pub fingerprint: String,
    /// Credential kind.
    pub kind: CredentialType,
    /// Registration state.
    pub state: RegistrationState,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregistered_at: Option<DateTime<Utc>>,
}

/// State of a device activation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationState {
    /// Created, waiting for the device to come alive and activate.
    Ready,
    /// Consumed by a completed activation.
    Completed,
    /// Taken out of flight, e.g. by a device replacement.
    Disabled,
}

/// In-flight activation record for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub serial_number: String,
    pub state: ActivationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity registration contract.
pub trait IdentityRegistrationAdapter: Send + Sync {
    /// Register credential material for a device id.
    fn register(
        &self,
        device_id: &str,
        credential: &Credential,
    ) -> IdentityResult<CredentialRegistration>;

    /// Deregister the active credentials of a device id.
    fn deregister(&self, device_id: &str) -> IdentityResult<()>;

    /// The active (non-deregistered) registration for a device id, if any.
    fn active_registration(&self, device_id: &str) -> IdentityResult<Option<CredentialRegistration>>;

    /// Create an activation-ready record for a device.
    fn create_activation(&self, serial_number: &str) -> IdentityResult<ActivationRecord>;

    /// Mark a device's in-flight activation record as completed.
    /// No-op when no record is in flight.
    fn complete_activation(&self, serial_number: &str) -> IdentityResult<()>;

    /// Take a device's in-flight activation record out of flight.
    /// No-op when no record is in flight.
    fn disable_activation(&self, serial_number: &str) -> IdentityResult<()>;
}
