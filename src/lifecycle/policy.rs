//! Engine policy.
//!
//! One flat, host-loadable policy struct replaces the original platform's
//! per-deployment service variants. Every flag defaults to the common
//! production configuration.

use serde::{Deserialize, Serialize};

use crate::model::AssociationType;

/// Policy flags governing the lifecycle engine and sagas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    /// Allow delegate rows alongside the owner row. When disabled, every
    /// row behaves as an owner row.
    pub many_to_many: bool,

    /// Reject association of a provisioned device that carries a prior
    /// disassociated row.
    pub forbid_reassociation: bool,

    /// Require the external subscription workflow to be completed before
    /// terminate mutates anything.
    pub require_subscription_complete: bool,

    /// Require the replaced device to be STOLEN or FAULTY.
    pub replacement_requires_defect: bool,

    /// Return the replaced device to PROVISIONED at the end of the saga.
    pub release_replaced_device: bool,

    /// Push a factory-reset notification to the replaced device.
    pub reset_replaced_device: bool,

    /// Re-point the vehicle-registry linkage during replacement.
    pub sync_vehicle_registry: bool,

    /// Association types that may be delegated.
    pub delegate_types: Vec<AssociationType>,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            many_to_many: true,
            forbid_reassociation: false,
            require_subscription_complete: false,
            replacement_requires_defect: true,
            release_replaced_device: true,
            reset_replaced_device: true,
            sync_vehicle_registry: false,
            delegate_types: vec![AssociationType::Driver, AssociationType::Guest],
        }
    }
}

impl EnginePolicy {
    /// Whether the given type may be delegated under this policy.
    pub fn is_delegable(&self, kind: AssociationType) -> bool {
        !kind.is_owner() && self.delegate_types.contains(&kind)
    }
}
