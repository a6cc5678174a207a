//! Notification adapter.
//!
//! Delivers association lifecycle events to the platform's notification
//! system. Delivery failure during terminate can trigger the engine's
//! compensation path, so the recording in-memory implementation supports
//! one-shot failure injection.

mod errors;
mod memory;

pub use errors::{NotifyError, NotifyResult};
pub use memory::{RecordingNotifier, SentNotification};

use serde::{Deserialize, Serialize};

use crate::model::Association;

/// Lifecycle change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleChange {
    Initiated,
    Activated,
    Suspended,
    Restored,
    Terminated,
    DelegateCreated,
    DelegateUpdated,
}

impl LifecycleChange {
    /// Returns the string representation used in logs and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleChange::Initiated => "INITIATED",
            LifecycleChange::Activated => "ACTIVATED",
            LifecycleChange::Suspended => "SUSPENDED",
            LifecycleChange::Restored => "RESTORED",
            LifecycleChange::Terminated => "TERMINATED",
            LifecycleChange::DelegateCreated => "DELEGATE_CREATED",
            LifecycleChange::DelegateUpdated => "DELEGATE_UPDATED",
        }
    }
}

/// Notification delivery contract.
pub trait NotificationAdapter: Send + Sync {
    /// Deliver a lifecycle-change event for an association row.
    fn notify_lifecycle_change(
        &self,
        association: &Association,
        change: LifecycleChange,
    ) -> NotifyResult<()>;

    /// Push a factory-reset request to a replaced device.
    fn notify_device_reset(&self, serial_number: &str) -> NotifyResult<()>;
}
