//! Ownership and delegation resolver.
//!
//! Pure policy decisions over a device's live association rows: who is
//! owner, who is delegate, who may disassociate whose row, who may edit a
//! delegate window, and whether a termination cascades to credential
//! deregistration. With many-to-many mode disabled every row behaves as an
//! owner row.

mod resolver;

pub use resolver::{validate_window, OwnershipResolver, Role, WindowViolation};
