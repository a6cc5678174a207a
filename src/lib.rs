//! pairkit - device-user association lifecycle engine
//!
//! State machine and transactional orchestration keeping association
//! records, credential registrations, and downstream notifications
//! consistent for a connected-vehicle platform.

pub mod identity;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod observability;
pub mod ownership;
pub mod registry;
pub mod saga;
pub mod store;
pub mod subscription;
