//! Association store.
//!
//! Durable table of association rows keyed by device serial number, and the
//! sole arbiter of per-device serialization. Every mutating operation opens
//! a unit of work scoped to one device, performs its read-decide-write
//! sequence inside it, and commits or aborts explicitly. Read-only queries
//! take no unit of work.

mod errors;
mod memory;

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryAssociationStore;

use uuid::Uuid;

use crate::model::{Association, AssociationStatus};

/// Association store contract.
///
/// Implementations must guarantee that two units of work for the same
/// device serial never interleave: the second `begin` call observes the
/// first one's committed effects.
pub trait AssociationStore: Send + Sync {
    /// Open a unit of work serialized on the given device serial number.
    ///
    /// Blocks until any in-flight unit of work for the device completes.
    fn begin(&self, serial_number: &str) -> StoreResult<Box<dyn DeviceUnitOfWork + '_>>;

    /// Fetch a row by surrogate id.
    fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Association>>;

    /// Rows for a user in any of the given statuses.
    fn find_for_user(
        &self,
        user_id: Uuid,
        statuses: &[AssociationStatus],
    ) -> StoreResult<Vec<Association>>;

    /// All rows ever recorded for a device, terminal rows included.
    fn history_for_device(&self, serial_number: &str) -> StoreResult<Vec<Association>>;
}

/// A unit of work over one device's association rows.
///
/// Reads reflect committed state at `begin` time. Writes are staged and
/// become visible only on `commit`; dropping the unit of work without
/// committing discards them.
pub trait DeviceUnitOfWork {
    /// Serial number this unit of work is scoped to.
    fn serial_number(&self) -> &str;

    /// Committed rows for this device in any of the given statuses.
    fn rows(&self, statuses: &[AssociationStatus]) -> Vec<Association>;

    /// All committed rows for this device regardless of status.
    fn all_rows(&self) -> Vec<Association>;

    /// Stage a row insert.
    fn insert(&mut self, row: Association) -> StoreResult<()>;

    /// Stage a row update, matched by surrogate id.
    fn update(&mut self, row: Association) -> StoreResult<()>;

    /// Apply all staged writes atomically.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard all staged writes.
    fn abort(self: Box<Self>);
}
