//! Identity registration adapter errors.

use thiserror::Error;

/// Result type for identity registration operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors surfaced by the identity registration adapter.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// Registration requested for a device id that already has an active
    /// credential registration.
    #[error("Credentials already registered for device id {0}")]
    AlreadyRegistered(String),

    /// Deregistration requested for a device id with no active registration.
    #[error("No active credential registration for device id {0}")]
    NotRegistered(String),

    /// Credential material generation failed.
    #[error("Credential generation failed")]
    GenerationFailed,

    /// The identity system could not be reached.
    #[error("Identity registration system unavailable: {0}")]
    Unavailable(String),
}

impl IdentityError {
    /// Stable error code for propagation.
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::AlreadyRegistered(_) => "ASSOC_IDENTITY_ALREADY_REGISTERED",
            IdentityError::NotRegistered(_) => "ASSOC_IDENTITY_NOT_REGISTERED",
            IdentityError::GenerationFailed => "ASSOC_IDENTITY_GENERATION_FAILED",
            IdentityError::Unavailable(_) => "ASSOC_IDENTITY_UNAVAILABLE",
        }
    }
}
