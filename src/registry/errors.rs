//! Device registry adapter errors.

use thiserror::Error;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced by the device registry adapter.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A selector matched more than one device identity.
    #[error("Selector matched {matches} devices, expected one")]
    AmbiguousSelector { matches: usize },

    /// A state transition was requested for an unknown device.
    #[error("Device not found in registry: {0}")]
    UnknownDevice(String),

    /// The registry rejected the requested state transition.
    #[error("Registry rejected transition for {serial_number}: {reason}")]
    TransitionRejected {
        serial_number: String,
        reason: String,
    },

    /// The registry could not be reached.
    #[error("Device registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    /// Stable error code for propagation.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::AmbiguousSelector { .. } => "ASSOC_REGISTRY_AMBIGUOUS",
            RegistryError::UnknownDevice(_) => "ASSOC_REGISTRY_UNKNOWN_DEVICE",
            RegistryError::TransitionRejected { .. } => "ASSOC_REGISTRY_TRANSITION_REJECTED",
            RegistryError::Unavailable(_) => "ASSOC_REGISTRY_UNAVAILABLE",
        }
    }
}
