//! In-process association store with call counters and fault injection.
//!
//! # Responsibility
//! - Provide an `AssociationStore` with the same observable contract as the
//!   SQLite adapter, without a database.
//! - Record how often each operation ran so callers can assert round-trips.
//! - Fail selected operations on demand to exercise error paths.
//!
//! # Invariants
//! - A failed insert batch leaves no rows behind (statement-level atomicity).
//! - At most one row exists per `(owner_id, target_id)`.
//! - Association ids are never reused.

use crate::model::association::{AssociationId, AssociationRow, NewAssociation};
use crate::model::product::{ProductId, TagId};
use crate::repo::association_repo::{AssociationStore, StoreError, StoreResult};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

/// Number of calls per store operation, failed calls included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub fetch: usize,
    pub insert: usize,
    pub delete: usize,
}

impl StoreCallCounts {
    /// Insert plus delete calls.
    pub fn writes(&self) -> usize {
        self.insert + self.delete
    }
}

/// Failure to inject into the next call of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Fails with `StoreError::Unavailable`.
    Unavailable,
    /// Fails with `StoreError::Conflict`.
    Conflict,
}

impl StoreFault {
    fn into_error(self, operation: &str) -> StoreError {
        match self {
            Self::Unavailable => StoreError::Unavailable(format!("injected {operation} failure")),
            Self::Conflict => StoreError::Conflict(format!("injected {operation} conflict")),
        }
    }
}

#[derive(Debug, Default)]
struct PendingFaults {
    fetch: Cell<Option<StoreFault>>,
    insert: Cell<Option<StoreFault>>,
    delete: Cell<Option<StoreFault>>,
}

/// Association store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryAssociationStore {
    rows: BTreeMap<AssociationId, AssociationRow>,
    next_id: AssociationId,
    clock_ms: i64,
    calls: Cell<StoreCallCounts>,
    faults: PendingFaults,
}

impl Default for MemoryAssociationStore {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
            clock_ms: 1_000,
            calls: Cell::new(StoreCallCounts::default()),
            faults: PendingFaults::default(),
        }
    }
}

impl MemoryAssociationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one row with a caller-chosen association id.
    ///
    /// Later generated ids continue above the largest seeded id.
    pub fn seed(&mut self, association_id: AssociationId, owner_id: ProductId, target_id: TagId) {
        self.clock_ms += 1;
        self.rows.insert(
            association_id,
            AssociationRow {
                association_id,
                owner_id,
                target_id,
                created_at: self.clock_ms,
            },
        );
        self.next_id = self.next_id.max(association_id + 1);
    }

    /// Rows of one owner ordered by association id.
    pub fn rows_for(&self, owner_id: ProductId) -> Vec<AssociationRow> {
        self.rows
            .values()
            .filter(|row| row.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Target ids currently linked to one owner.
    pub fn target_ids(&self, owner_id: ProductId) -> BTreeSet<TagId> {
        self.rows
            .values()
            .filter(|row| row.owner_id == owner_id)
            .map(|row| row.target_id)
            .collect()
    }

    pub fn calls(&self) -> StoreCallCounts {
        self.calls.get()
    }

    pub fn reset_calls(&mut self) {
        self.calls.set(StoreCallCounts::default());
    }

    /// Makes the next `fetch_current` fail.
    pub fn fail_next_fetch(&mut self, fault: StoreFault) {
        self.faults.fetch.set(Some(fault));
    }

    /// Makes the next `insert_batch` fail.
    pub fn fail_next_insert(&mut self, fault: StoreFault) {
        self.faults.insert.set(Some(fault));
    }

    /// Makes the next `delete_batch` fail.
    pub fn fail_next_delete(&mut self, fault: StoreFault) {
        self.faults.delete.set(Some(fault));
    }

    fn record_call(&self, bump: impl FnOnce(&mut StoreCallCounts)) {
        let mut calls = self.calls.get();
        bump(&mut calls);
        self.calls.set(calls);
    }

    fn has_link(&self, owner_id: ProductId, target_id: TagId) -> bool {
        self.rows
            .values()
            .any(|row| row.owner_id == owner_id && row.target_id == target_id)
    }
}

impl AssociationStore for MemoryAssociationStore {
    fn fetch_current(&self, owner_id: ProductId) -> StoreResult<Vec<AssociationRow>> {
        self.record_call(|calls| calls.fetch += 1);
        if let Some(fault) = self.faults.fetch.take() {
            return Err(fault.into_error("fetch"));
        }
        Ok(self.rows_for(owner_id))
    }

    fn insert_batch(&mut self, rows: &[NewAssociation]) -> StoreResult<Vec<AssociationId>> {
        self.record_call(|calls| calls.insert += 1);
        if let Some(fault) = self.faults.insert.take() {
            return Err(fault.into_error("insert"));
        }

        let mut batch = BTreeSet::new();
        for row in rows {
            if self.has_link(row.owner_id, row.target_id) || !batch.insert(*row) {
                return Err(StoreError::Constraint(format!(
                    "duplicate link owner_id={} target_id={}",
                    row.owner_id, row.target_id
                )));
            }
        }

        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let association_id = self.next_id;
            self.next_id += 1;
            self.clock_ms += 1;
            self.rows.insert(
                association_id,
                AssociationRow {
                    association_id,
                    owner_id: row.owner_id,
                    target_id: row.target_id,
                    created_at: self.clock_ms,
                },
            );
            inserted.push(association_id);
        }
        Ok(inserted)
    }

    fn delete_batch(&mut self, association_ids: &BTreeSet<AssociationId>) -> StoreResult<usize> {
        self.record_call(|calls| calls.delete += 1);
        if let Some(fault) = self.faults.delete.take() {
            return Err(fault.into_error("delete"));
        }

        Ok(association_ids
            .iter()
            .filter(|id| self.rows.remove(*id).is_some())
            .count())
    }
}
