//! Recording notifier for tests and local tooling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::json;

use crate::model::Association;

use super::errors::{NotifyError, NotifyResult};
use super::{LifecycleChange, NotificationAdapter};

/// A delivered notification, kept for assertions.
#[derive(Debug, Clone)]
pub struct SentNotification {
    pub serial_number: String,
    pub change: LifecycleChange,
    pub payload: serde_json::Value,
}

/// Notifier that records every delivery in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    resets: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next delivery fail once.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Everything delivered so far.
    pub fn deliveries(&self) -> Vec<SentNotification> {
        self.sent.lock().expect("notifier lock poisoned").clone()
    }

    /// Serial numbers that received a reset push.
    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().expect("notifier lock poisoned").clone()
    }

    fn check_injected_failure(&self) -> NotifyResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NotifyError::DeliveryFailed(
                "injected delivery failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl NotificationAdapter for RecordingNotifier {
    fn notify_lifecycle_change(
        &self,
        association: &Association,
        change: LifecycleChange,
    ) -> NotifyResult<()> {
        self.check_injected_failure()?;
        let payload = json!({
            "association_id": association.id,
            "serial_number": association.serial_number,
            "user_id": association.user_id,
            "type": association.kind.as_str(),
            "status": association.status.as_str(),
            "change": change.as_str(),
        });
        self.sent
            .lock()
            .map_err(|_| NotifyError::Unavailable("notifier lock poisoned".to_string()))?
            .push(SentNotification {
                serial_number: association.serial_number.clone(),
                change,
                payload,
            });
        Ok(())
    }

    fn notify_device_reset(&self, serial_number: &str) -> NotifyResult<()> {
        self.check_injected_failure()?;
        self.resets
            .lock()
            .map_err(|_| NotifyError::Unavailable("notifier lock poisoned".to_string()))?
            .push(serial_number.to_string());
        Ok(())
    }
}
