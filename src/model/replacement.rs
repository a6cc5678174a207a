//! Replacement operation scope.
//!
//! Ephemeral value pairing the defective device, its replacement, and the
//! acting user for one replace call. Never persisted.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::device::DeviceIdentity;

/// One replace call's working set.
#[derive(Debug, Clone)]
pub struct ReplacementOperation {
    /// Correlation id for logs and audit records.
    pub id: Uuid,
    /// The device being replaced.
    pub current: DeviceIdentity,
    /// The device taking over.
    pub replacement: DeviceIdentity,
    /// User driving the replacement.
    pub acting_user: Uuid,
    /// When the saga started.
    pub started_at: DateTime<Utc>,
}

impl ReplacementOperation {
    /// Scope a replacement of `current` by `replacement`.
    pub fn new(current: DeviceIdentity, replacement: DeviceIdentity, acting_user: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            current,
            replacement,
            acting_user,
            started_at: Utc::now(),
        }
    }
}
