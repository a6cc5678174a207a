//! Notification adapter errors.

use thiserror::Error;

/// Result type for notification delivery.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors surfaced by the notification adapter.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// Delivery was attempted and rejected downstream.
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),

    /// The notification system could not be reached.
    #[error("Notification system unavailable: {0}")]
    Unavailable(String),
}

impl NotifyError {
    /// Stable error code for propagation.
    pub fn code(&self) -> &'static str {
        match self {
            NotifyError::DeliveryFailed(_) => "ASSOC_NOTIFY_DELIVERY_FAILED",
            NotifyError::Unavailable(_) => "ASSOC_NOTIFY_UNAVAILABLE",
        }
    }
}
