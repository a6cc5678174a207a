//! Subscription workflow adapter.
//!
//! The platform runs an external subscription workflow per device. Under
//! policy, terminate requires that workflow to be completed before any
//! mutation happens. This adapter only reports workflow state; the
//! workflow itself is external.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for subscription workflow queries.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Errors surfaced by the subscription workflow adapter.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// The workflow system could not be reached.
    #[error("Subscription workflow system unavailable: {0}")]
    Unavailable(String),
}

impl SubscriptionError {
    /// Stable error code for propagation.
    pub fn code(&self) -> &'static str {
        match self {
            SubscriptionError::Unavailable(_) => "ASSOC_SUBSCRIPTION_UNAVAILABLE",
        }
    }
}

/// State of the external subscription workflow for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    NotStarted,
    InProgress,
    Completed,
}

/// Subscription workflow contract.
pub trait SubscriptionWorkflowAdapter: Send + Sync {
    /// Workflow state for a device.
    fn workflow_state(&self, serial_number: &str) -> SubscriptionResult<WorkflowState>;
}

/// In-memory workflow states for tests and local tooling.
///
/// Devices without an explicit entry report `NotStarted`.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionWorkflow {
    states: RwLock<HashMap<String, WorkflowState>>,
}

impl InMemorySubscriptionWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workflow state for a device.
    pub fn set_state(&self, serial_number: impl Into<String>, state: WorkflowState) {
        self.states
            .write()
            .expect("subscription lock poisoned")
            .insert(serial_number.into(), state);
    }
}

impl SubscriptionWorkflowAdapter for InMemorySubscriptionWorkflow {
    fn workflow_state(&self, serial_number: &str) -> SubscriptionResult<WorkflowState> {
        let states = self
            .states
            .read()
            .map_err(|_| SubscriptionError::Unavailable("subscription lock poisoned".to_string()))?;
        Ok(states
            .get(serial_number)
            .copied()
            .unwrap_or(WorkflowState::NotStarted))
    }
}
