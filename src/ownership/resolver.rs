//! Role resolution and delegation gates.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::Association;

/// Role a user holds for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Delegate,
}

/// Why a delegation window is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowViolation {
    /// Both bounds set and start is not strictly before end.
    StartNotBeforeEnd,
}

impl WindowViolation {
    /// Human-readable reason, used in error messages.
    pub fn reason(&self) -> &'static str {
        match self {
            WindowViolation::StartNotBeforeEnd => "window start must be before window end",
        }
    }
}

/// Validate a delegation validity window. Open-ended windows are valid.
pub fn validate_window(
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
) -> Result<(), WindowViolation> {
    match valid_until {
        Some(until) if valid_from >= until => Err(WindowViolation::StartNotBeforeEnd),
        _ => Ok(()),
    }
}

/// Resolver over a device's live rows, parameterized by the many-to-many
/// capability flag.
#[derive(Debug, Clone, Copy)]
pub struct OwnershipResolver {
    many_to_many: bool,
}

impl OwnershipResolver {
    pub fn new(many_to_many: bool) -> Self {
        Self { many_to_many }
    }

    /// The role a user holds among the given live rows, if any.
    ///
    /// With many-to-many disabled, any live row confers the owner role.
    pub fn role_for(&self, live_rows: &[Association], user_id: Uuid) -> Option<Role> {
        let row = live_rows.iter().find(|r| r.user_id == user_id)?;
        Some(self.effective_role(row))
    }

    /// The effective role a single row confers.
    pub fn effective_role(&self, row: &Association) -> Role {
        if row.kind.is_owner() || !self.many_to_many {
            Role::Owner
        } else {
            Role::Delegate
        }
    }

    /// The live owner-type row of a device, if one exists.
    pub fn owner_row<'a>(&self, live_rows: &'a [Association]) -> Option<&'a Association> {
        live_rows.iter().find(|r| r.kind.is_owner())
    }

    /// Whether `acting_user` may disassociate `row`.
    ///
    /// Users may always disassociate their own row; another user's row may
    /// only be disassociated by the device owner or an administrator.
    pub fn may_disassociate(
        &self,
        live_rows: &[Association],
        row: &Association,
        acting_user: Uuid,
        is_admin: bool,
    ) -> bool {
        if is_admin || row.user_id == acting_user {
            return true;
        }
        self.role_for(live_rows, acting_user) == Some(Role::Owner)
    }

    /// Whether `acting_user` may edit a delegate row's type or window.
    /// Owner only; administrators get no shortcut here.
    pub fn may_edit_delegate(&self, live_rows: &[Association], acting_user: Uuid) -> bool {
        self.role_for(live_rows, acting_user) == Some(Role::Owner)
    }

    /// Whether terminating `row` cascades to credential deregistration.
    pub fn cascades_credentials(&self, row: &Association) -> bool {
        self.effective_role(row) == Role::Owner
    }
}
