//! Observable lifecycle events.
//!
//! Events are explicit and typed; every state transition and every
//! orchestration milestone has one.

use std::fmt;

/// Observable events emitted by the engine and the sagas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Association state machine
    /// Owner association created, device readied for activation
    AssociationInitiated,
    /// Activation completed, credentials registered
    AssociationActivated,
    /// Owner association suspended, credentials deregistered
    AssociationSuspended,
    /// Suspended association restored, credentials re-registered
    AssociationRestored,
    /// Association disassociated (terminal)
    AssociationTerminated,

    // Delegation
    /// Delegate association created
    DelegateCreated,
    /// Delegate type or window updated
    DelegateUpdated,

    // Compensation
    /// Credential re-registration attempted after a fan-out failure
    CompensationAttempted,
    /// Known inconsistency left behind deliberately (row terminal,
    /// credentials restored)
    InconsistencyRecorded,

    // Replacement saga
    /// Replacement validation passed, mutation begins
    ReplacementStarted,
    /// Association linkage re-pointed to the replacement device
    ReplacementLinkageRepointed,
    /// Replacement completed
    ReplacementCompleted,
    /// Replacement failed after mutation started
    ReplacementFailed,

    // Wipe orchestration
    /// Wipe accepted, per-device processing begins
    WipeStarted,
    /// One device fully wiped (terminated and, for owners, re-associated)
    WipeDeviceCompleted,
    /// All devices wiped, terminal rows anonymized
    WipeCompleted,
    /// Wipe aborted; already-processed devices stay terminated
    WipeFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::AssociationInitiated => "ASSOCIATION_INITIATED",
            Event::AssociationActivated => "ASSOCIATION_ACTIVATED",
            Event::AssociationSuspended => "ASSOCIATION_SUSPENDED",
            Event::AssociationRestored => "ASSOCIATION_RESTORED",
            Event::AssociationTerminated => "ASSOCIATION_TERMINATED",
            Event::DelegateCreated => "DELEGATE_CREATED",
            Event::DelegateUpdated => "DELEGATE_UPDATED",
            Event::CompensationAttempted => "COMPENSATION_ATTEMPTED",
            Event::InconsistencyRecorded => "INCONSISTENCY_RECORDED",
            Event::ReplacementStarted => "REPLACEMENT_STARTED",
            Event::ReplacementLinkageRepointed => "REPLACEMENT_LINKAGE_REPOINTED",
            Event::ReplacementCompleted => "REPLACEMENT_COMPLETED",
            Event::ReplacementFailed => "REPLACEMENT_FAILED",
            Event::WipeStarted => "WIPE_STARTED",
            Event::WipeDeviceCompleted => "WIPE_DEVICE_COMPLETED",
            Event::WipeCompleted => "WIPE_COMPLETED",
            Event::WipeFailed => "WIPE_FAILED",
        }
    }

    /// Whether the event marks a failure path.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Event::InconsistencyRecorded | Event::ReplacementFailed | Event::WipeFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
