//! In-memory association store.
//!
//! Reference implementation of the store contract, used by tests and local
//! tooling. Serialization is coarse: one mutex guards the whole table, so a
//! unit of work for any device blocks all other units of work until it
//! closes. That satisfies the per-device serialization contract; a real
//! backend would hold row-level locks instead.

use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::model::{Association, AssociationStatus};

use super::errors::{StoreError, StoreResult};
use super::{AssociationStore, DeviceUnitOfWork};

/// In-memory store over a single locked row table.
#[derive(Debug, Default)]
pub struct InMemoryAssociationStore {
    rows: Mutex<Vec<Association>>,
}

impl InMemoryAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, for assertions in tests.
    pub fn dump(&self) -> StoreResult<Vec<Association>> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.clone())
    }
}

impl AssociationStore for InMemoryAssociationStore {
    fn begin(&self, serial_number: &str) -> StoreResult<Box<dyn DeviceUnitOfWork + '_>> {
        let guard = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            serial_number: serial_number.to_string(),
            staged: Vec::new(),
        }))
    }

    fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Association>> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.iter().find(|r| r.id == id).cloned())
    }

    fn find_for_user(
        &self,
        user_id: Uuid,
        statuses: &[AssociationStatus],
    ) -> StoreResult<Vec<Association>> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.user_id == user_id && statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    fn history_for_device(&self, serial_number: &str) -> StoreResult<Vec<Association>> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.serial_number == serial_number)
            .cloned()
            .collect())
    }
}

enum Staged {
    Insert(Association),
    Update(Association),
}

struct MemoryUnitOfWork<'a> {
    guard: MutexGuard<'a, Vec<Association>>,
    serial_number: String,
    staged: Vec<Staged>,
}

impl DeviceUnitOfWork for MemoryUnitOfWork<'_> {
    fn serial_number(&self) -> &str {
        &self.serial_number
    }

    fn rows(&self, statuses: &[AssociationStatus]) -> Vec<Association> {
        self.guard
            .iter()
            .filter(|r| r.serial_number == self.serial_number && statuses.contains(&r.status))
            .cloned()
            .collect()
    }

    fn all_rows(&self) -> Vec<Association> {
        self.guard
            .iter()
            .filter(|r| r.serial_number == self.serial_number)
            .cloned()
            .collect()
    }

    fn insert(&mut self, row: Association) -> StoreResult<()> {
        let clashes = self.guard.iter().any(|r| r.id == row.id)
            || self.staged.iter().any(|s| match s {
                Staged::Insert(r) | Staged::Update(r) => r.id == row.id,
            });
        if clashes {
            return Err(StoreError::DuplicateRow(row.id));
        }
        self.staged.push(Staged::Insert(row));
        Ok(())
    }

    fn update(&mut self, row: Association) -> StoreResult<()> {
        let known = self.guard.iter().any(|r| r.id == row.id)
            || self.staged.iter().any(|s| matches!(s, Staged::Insert(r) if r.id == row.id));
        if !known {
            return Err(StoreError::RowNotFound(row.id));
        }
        self.staged.push(Staged::Update(row));
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        for staged in std::mem::take(&mut self.staged) {
            match staged {
                Staged::Insert(row) => self.guard.push(row),
                Staged::Update(row) => {
                    let slot = self
                        .guard
                        .iter_mut()
                        .find(|r| r.id == row.id)
                        .ok_or(StoreError::RowNotFound(row.id))?;
                    *slot = row;
                }
            }
        }
        Ok(())
    }

    fn abort(self: Box<Self>) {
        // Staged writes are dropped with self.
    }
}
