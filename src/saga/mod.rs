//! Multi-entity orchestrations.
//!
//! Sagas span several entities with no enclosing transaction. Step order is
//! fixed so partial failure leaves a recoverable shape; failures after the
//! first mutation surface without rollback and every completed step is
//! logged.

mod replacement;
mod wipe;

pub use replacement::{ReplacementOutcome, ReplacementSaga};
pub use wipe::{WipeOrchestrator, WipeOutcome};
