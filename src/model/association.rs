//! # Association Record
//!
//! The durable record linking a device identity to a user account for a
//! bounded or open-ended period.
//!
//! ## Invariants
//! - ASSOC-1: At most one owner-type, non-disassociated association per device
//! - ASSOC-3: Disassociated is terminal; audit fields are retained
//! - ASSOC-4: Suspended is only reachable from Associated and only returns there

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Association lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationStatus {
    /// Created, waiting for the device to complete activation.
    Initiated,
    /// Fully established; credentials registered for owner rows.
    Associated,
    /// Credentials deregistered, association kept; owner rows only.
    Suspended,
    /// Terminal. Never re-entered.
    Disassociated,
}

impl AssociationStatus {
    /// Returns the string representation used in logs and error details.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationStatus::Initiated => "INITIATED",
            AssociationStatus::Associated => "ASSOCIATED",
            AssociationStatus::Suspended => "SUSPENDED",
            AssociationStatus::Disassociated => "DISASSOCIATED",
        }
    }

    /// A live status is any status that is not terminal.
    pub fn is_live(&self) -> bool {
        !matches!(self, AssociationStatus::Disassociated)
    }
}

impl std::fmt::Display for AssociationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The statuses considered live for duplicate guards and terminate lookups.
pub(crate) const LIVE_STATUSES: [AssociationStatus; 3] = [
    AssociationStatus::Initiated,
    AssociationStatus::Associated,
    AssociationStatus::Suspended,
];

/// Association type. Owner is the primary, exclusive type conferring
/// credential ownership; Driver and Guest are delegate types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationType {
    Owner,
    Driver,
    Guest,
}

impl AssociationType {
    /// Returns the string representation used in logs and error details.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationType::Owner => "OWNER",
            AssociationType::Driver => "DRIVER",
            AssociationType::Guest => "GUEST",
        }
    }

    /// Whether this is the owner type.
    pub fn is_owner(&self) -> bool {
        matches!(self, AssociationType::Owner)
    }
}

impl Default for AssociationType {
    fn default() -> Self {
        AssociationType::Owner
    }
}

impl std::fmt::Display for AssociationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit trail kept on every association row.
///
/// Disassociation stamps are never cleared once set (ASSOC-3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub associated_by: Option<Uuid>,
    pub associated_on: Option<DateTime<Utc>>,
    pub disassociated_by: Option<Uuid>,
    pub disassociated_on: Option<DateTime<Utc>>,
    pub modified_by: Option<Uuid>,
    pub modified_on: Option<DateTime<Utc>>,
}

/// Association row model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    /// Surrogate id.
    pub id: Uuid,

    /// Device serial number the row is keyed by.
    pub serial_number: String,

    /// Device/credential id in the identity registration system.
    /// Set when credentials are first registered; delegate rows never own one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Reference into the manufacturing factory-data set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory_data_ref: Option<String>,

    /// Vehicle-registry linkage carried through device replacement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,

    /// User holding this association.
    pub user_id: Uuid,

    /// Owner or delegate type.
    pub kind: AssociationType,

    /// Validity window start.
    pub valid_from: DateTime<Utc>,

    /// Validity window end; unset means open-ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    /// Lifecycle status.
    pub status: AssociationStatus,

    /// Audit stamps.
    pub audit: AuditTrail,
}

impl Association {
    /// Create a fresh owner-type row in Initiated state.
    pub fn new_owner(serial_number: impl Into<String>, user_id: Uuid, acting_user: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            serial_number: serial_number.into(),
            device_id: None,
            factory_data_ref: None,
            vin: None,
            user_id,
            kind: AssociationType::Owner,
            valid_from: now,
            valid_until: None,
            status: AssociationStatus::Initiated,
            audit: AuditTrail {
                associated_by: Some(acting_user),
                associated_on: Some(now),
                ..AuditTrail::default()
            },
        }
    }

    /// Create a delegate-type row. Delegates are established directly in
    /// Associated state since no device activation is involved.
    pub fn new_delegate(
        serial_number: impl Into<String>,
        user_id: Uuid,
        kind: AssociationType,
        valid_from: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
        acting_user: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            serial_number: serial_number.into(),
            device_id: None,
            factory_data_ref: None,
            vin: None,
            user_id,
            kind,
            valid_from,
            valid_until,
            status: AssociationStatus::Associated,
            audit: AuditTrail {
                associated_by: Some(acting_user),
                associated_on: Some(valid_from),
                ..AuditTrail::default()
            },
        }
    }

    /// Whether the row counts against duplicate guards and owner exclusivity.
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Move the row to Disassociated and stamp the audit trail.
    ///
    /// # Invariant
    /// ASSOC-3: terminal, audit fields retained.
    pub fn mark_disassociated(&mut self, acting_user: Uuid) {
        let now = Utc::now();
        self.status = AssociationStatus::Disassociated;
        self.valid_until.get_or_insert(now);
        self.audit.disassociated_by = Some(acting_user);
        self.audit.disassociated_on = Some(now);
        self.mark_modified(acting_user);
    }

    /// Stamp the modification audit fields.
    pub fn mark_modified(&mut self, acting_user: Uuid) {
        self.audit.modified_by = Some(acting_user);
        self.audit.modified_on = Some(Utc::now());
    }

    /// Overwrite identifying fields with an unresolvable sentinel.
    ///
    /// Used by the wipe orchestrator on terminal rows so historical rows
    /// cannot be mistaken for live data. Irreversible; the surrogate id and
    /// audit timestamps survive for history.
    pub fn anonymize(&mut self) {
        self.user_id = Uuid::nil();
        self.serial_number = format!("anonymized:{}", self.id);
        self.device_id = None;
        self.factory_data_ref = None;
        self.vin = None;
        self.audit.associated_by = None;
        self.audit.disassociated_by = None;
        self.audit.modified_by = None;
    }

    /// Whether the row has been anonymized.
    pub fn is_anonymized(&self) -> bool {
        self.user_id.is_nil() && self.serial_number.starts_with("anonymized:")
    }
}
