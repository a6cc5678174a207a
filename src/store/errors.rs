//! Store error types.

use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the association store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A lock protecting the store was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// An update referenced a row that does not exist.
    #[error("Association row not found: {0}")]
    RowNotFound(Uuid),

    /// An insert collided with an existing row id.
    #[error("Association row already exists: {0}")]
    DuplicateRow(Uuid),

    /// The unit of work was already committed or aborted.
    #[error("Unit of work is closed")]
    UnitOfWorkClosed,

    /// Backend-specific failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Stable error code for propagation.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::LockPoisoned => "ASSOC_STORE_LOCK_POISONED",
            StoreError::RowNotFound(_) => "ASSOC_STORE_ROW_NOT_FOUND",
            StoreError::DuplicateRow(_) => "ASSOC_STORE_DUPLICATE_ROW",
            StoreError::UnitOfWorkClosed => "ASSOC_STORE_UOW_CLOSED",
            StoreError::Backend(_) => "ASSOC_STORE_BACKEND",
        }
    }
}
