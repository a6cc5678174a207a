//! # Lifecycle Error Taxonomy
//!
//! Every operation failure is typed and carries a stable code. The class
//! drives propagation behavior:
//! - Validation: rejected pre-mutation, retryable after input fix
//! - Precondition: rejected pre-mutation, not auto-retried
//! - Integrity: fatal, never silently resolved
//! - FanOut: local state already committed, best-effort compensation done
//! - Adapter: a collaborating system failed or was unreachable

use thiserror::Error;
use uuid::Uuid;

use crate::identity::IdentityError;
use crate::model::{AssociationStatus, AssociationType, DeviceLifecycleState};
use crate::notify::NotifyError;
use crate::registry::RegistryError;
use crate::store::StoreError;
use crate::subscription::SubscriptionError;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Failure classification, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Precondition,
    Integrity,
    FanOut,
    Adapter,
}

/// Lifecycle operation failures.
#[derive(Debug, Error)]
pub enum LifecycleError {
    // ==================
    // Validation
    // ==================
    /// Selector carries no identifying field.
    #[error("Selector must carry at least one of serial number, IMEI, BSSID")]
    EmptySelector,

    /// A validity window failed validation.
    #[error("Invalid validity window: {0}")]
    InvalidWindow(String),

    /// The requested association type equals the owner type.
    #[error("The owner type cannot be delegated")]
    OwnerTypeNotDelegable,

    /// The requested association type is not in the allow-listed set.
    #[error("Association type {0} is not delegable")]
    DisallowedType(AssociationType),

    // ==================
    // Preconditions
    // ==================
    /// No device identity matched the selector.
    #[error("No device found for selector {0}")]
    DeviceNotFound(String),

    /// Device lifecycle state does not permit the operation.
    #[error("Device {serial_number} is in state {state}, operation not permitted")]
    DeviceStateInvalid {
        serial_number: String,
        state: DeviceLifecycleState,
    },

    /// Another user already holds the live owner association.
    #[error("Device {serial_number} is already associated")]
    AlreadyAssociated { serial_number: String },

    /// The acting user already holds a live association for this device.
    #[error("User already holds a live association for device {serial_number}")]
    DuplicateAssociation { serial_number: String },

    /// Policy forbids re-association of a previously terminated device.
    #[error("Re-association of device {serial_number} is forbidden by policy")]
    ReassociationForbidden { serial_number: String },

    /// Policy requires the external subscription workflow to be completed.
    #[error("Subscription workflow for device {serial_number} is not completed")]
    SubscriptionIncomplete { serial_number: String },

    /// No live association row exists for the device and user.
    #[error("No live association for device {serial_number}")]
    NoLiveAssociation { serial_number: String },

    /// The row is not in the status the operation requires.
    #[error("Association for device {serial_number} is {status}, expected {expected}")]
    UnexpectedStatus {
        serial_number: String,
        status: AssociationStatus,
        expected: AssociationStatus,
    },

    /// The acting user is not the device owner.
    #[error("Operation requires the device owner")]
    NotOwner,

    /// No association row with the given id exists.
    #[error("Association not found: {0}")]
    AssociationNotFound(Uuid),

    /// The targeted row is not a delegate row.
    #[error("Association {0} is not a delegate row")]
    NotDelegateRow(Uuid),

    /// The targeted row is already disassociated.
    #[error("Association {0} is already disassociated")]
    AssociationClosed(Uuid),

    /// The current device of a replacement is not defective.
    #[error("Device {serial_number} is {state}, replacement requires a defective device")]
    ReplacementNotDefective {
        serial_number: String,
        state: DeviceLifecycleState,
    },

    /// The replacement device is not freshly provisioned.
    #[error("Replacement device {serial_number} is {state}, expected PROVISIONED")]
    ReplacementNotProvisioned {
        serial_number: String,
        state: DeviceLifecycleState,
    },

    /// Wipe found no associated rows for the user.
    #[error("User {0} holds no associated devices")]
    NothingToWipe(Uuid),

    /// Wipe was given a serial subset not matching the user's live set.
    #[error("Wipe subset does not match the user's associated devices (expected {expected}, supplied {supplied})")]
    WipeSubsetMismatch { expected: usize, supplied: usize },

    // ==================
    // Integrity faults
    // ==================
    /// More than one row matched where exactly one was expected.
    #[error("Data integrity fault for device {serial_number}: {found} rows where one was expected")]
    IntegrityFault { serial_number: String, found: usize },

    /// A selector matched more than one device identity.
    #[error("Selector resolved to {matches} devices, expected one")]
    AmbiguousDevice { matches: usize },

    /// The credential registration expected to exist is missing.
    #[error("No active credential registration for device {serial_number}")]
    NoActiveRegistration { serial_number: String },

    // ==================
    // Fan-out
    // ==================
    /// A fan-out call failed after the local state was committed.
    /// `compensated` records whether the credential re-registration
    /// compensation was applied successfully.
    #[error("Fan-out failed after local commit during {operation}: {source}")]
    FanOutFailed {
        operation: &'static str,
        compensated: bool,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ==================
    // Adapter failures
    // ==================
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(RegistryError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl From<RegistryError> for LifecycleError {
    fn from(err: RegistryError) -> Self {
        match err {
            // Ambiguity is an integrity fault, not an adapter hiccup:
            // the engine never guesses which device was meant.
            RegistryError::AmbiguousSelector { matches } => {
                LifecycleError::AmbiguousDevice { matches }
            }
            other => LifecycleError::Registry(other),
        }
    }
}

impl LifecycleError {
    /// Failure classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            LifecycleError::EmptySelector
            | LifecycleError::InvalidWindow(_)
            | LifecycleError::OwnerTypeNotDelegable
            | LifecycleError::DisallowedType(_) => ErrorClass::Validation,

            LifecycleError::DeviceNotFound(_)
            | LifecycleError::DeviceStateInvalid { .. }
            | LifecycleError::AlreadyAssociated { .. }
            | LifecycleError::DuplicateAssociation { .. }
            | LifecycleError::ReassociationForbidden { .. }
            | LifecycleError::SubscriptionIncomplete { .. }
            | LifecycleError::NoLiveAssociation { .. }
            | LifecycleError::UnexpectedStatus { .. }
            | LifecycleError::NotOwner
            | LifecycleError::AssociationNotFound(_)
            | LifecycleError::NotDelegateRow(_)
            | LifecycleError::AssociationClosed(_)
            | LifecycleError::ReplacementNotDefective { .. }
            | LifecycleError::ReplacementNotProvisioned { .. }
            | LifecycleError::NothingToWipe(_)
            | LifecycleError::WipeSubsetMismatch { .. } => ErrorClass::Precondition,

            LifecycleError::IntegrityFault { .. }
            | LifecycleError::AmbiguousDevice { .. }
            | LifecycleError::NoActiveRegistration { .. } => ErrorClass::Integrity,

            LifecycleError::FanOutFailed { .. } => ErrorClass::FanOut,

            LifecycleError::Store(_)
            | LifecycleError::Registry(_)
            | LifecycleError::Identity(_)
            | LifecycleError::Notify(_)
            | LifecycleError::Subscription(_) => ErrorClass::Adapter,
        }
    }

    /// Stable error code for API surfaces and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::EmptySelector => "ASSOC_EMPTY_SELECTOR",
            LifecycleError::InvalidWindow(_) => "ASSOC_INVALID_WINDOW",
            LifecycleError::OwnerTypeNotDelegable => "ASSOC_OWNER_TYPE_NOT_DELEGABLE",
            LifecycleError::DisallowedType(_) => "ASSOC_TYPE_NOT_ALLOWED",
            LifecycleError::DeviceNotFound(_) => "ASSOC_DEVICE_NOT_FOUND",
            LifecycleError::DeviceStateInvalid { .. } => "ASSOC_DEVICE_STATE_INVALID",
            LifecycleError::AlreadyAssociated { .. } => "ASSOC_ALREADY_ASSOCIATED",
            LifecycleError::DuplicateAssociation { .. } => "ASSOC_DUPLICATE_ASSOCIATION",
            LifecycleError::ReassociationForbidden { .. } => "ASSOC_REASSOCIATION_FORBIDDEN",
            LifecycleError::SubscriptionIncomplete { .. } => "ASSOC_SUBSCRIPTION_INCOMPLETE",
            LifecycleError::NoLiveAssociation { .. } => "ASSOC_NO_LIVE_ASSOCIATION",
            LifecycleError::UnexpectedStatus { .. } => "ASSOC_UNEXPECTED_STATUS",
            LifecycleError::NotOwner => "ASSOC_NOT_OWNER",
            LifecycleError::AssociationNotFound(_) => "ASSOC_NOT_FOUND",
            LifecycleError::NotDelegateRow(_) => "ASSOC_NOT_DELEGATE_ROW",
            LifecycleError::AssociationClosed(_) => "ASSOC_CLOSED",
            LifecycleError::ReplacementNotDefective { .. } => "ASSOC_REPLACEMENT_NOT_DEFECTIVE",
            LifecycleError::ReplacementNotProvisioned { .. } => {
                "ASSOC_REPLACEMENT_NOT_PROVISIONED"
            }
            LifecycleError::NothingToWipe(_) => "ASSOC_NOTHING_TO_WIPE",
            LifecycleError::WipeSubsetMismatch { .. } => "ASSOC_WIPE_SUBSET_MISMATCH",
            LifecycleError::IntegrityFault { .. } => "ASSOC_INTEGRITY_FAULT",
            LifecycleError::AmbiguousDevice { .. } => "ASSOC_AMBIGUOUS_DEVICE",
            LifecycleError::NoActiveRegistration { .. } => "ASSOC_NO_ACTIVE_REGISTRATION",
            LifecycleError::FanOutFailed { .. } => "ASSOC_FANOUT_FAILED",
            LifecycleError::Store(_) => "ASSOC_STORE_FAILURE",
            LifecycleError::Registry(_) => "ASSOC_REGISTRY_FAILURE",
            LifecycleError::Identity(_) => "ASSOC_IDENTITY_FAILURE",
            LifecycleError::Notify(_) => "ASSOC_NOTIFY_FAILURE",
            LifecycleError::Subscription(_) => "ASSOC_SUBSCRIPTION_FAILURE",
        }
    }

    /// Integrity faults abort processing and demand operator attention.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Integrity
    }

    /// Only validation failures are worth retrying after fixing the input.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Validation
    }

    /// Whether the failure happened before any mutation.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Validation | ErrorClass::Precondition
        )
    }
}
