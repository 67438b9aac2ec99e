//! Per-owner mutual exclusion for reconciliations.
//!
//! # Invariants
//! - At most one guard exists per owner id at any time.
//! - Guards for different owners never wait on each other; the shared map is
//!   only held for the insert/remove itself.
//! - Dropping a guard releases the owner on every exit path.

use crate::model::product::ProductId;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Registry of owners currently being reconciled.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    held: Mutex<HashSet<ProductId>>,
    released: Condvar,
}

/// Exclusive claim on one owner, released on drop.
#[derive(Debug)]
pub struct OwnerGuard<'a> {
    locks: &'a OwnerLocks,
    owner_id: ProductId,
}

impl OwnerGuard<'_> {
    pub fn owner_id(&self) -> ProductId {
        self.owner_id
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.owner_id);
        self.locks.released.notify_all();
    }
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `owner_id` without waiting.
    pub fn try_acquire(&self, owner_id: ProductId) -> Option<OwnerGuard<'_>> {
        let mut held = self.held();
        if !held.insert(owner_id) {
            return None;
        }
        Some(OwnerGuard {
            locks: self,
            owner_id,
        })
    }

    /// Claims `owner_id`, waiting up to `timeout` for the current holder.
    ///
    /// Returns `None` when the owner is still held after `timeout`. A
    /// timeout too large to express as a deadline waits indefinitely.
    pub fn acquire_timeout(
        &self,
        owner_id: ProductId,
        timeout: Duration,
    ) -> Option<OwnerGuard<'_>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut held = self.held();
        while held.contains(&owner_id) {
            held = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    self.released
                        .wait_timeout(held, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        held.insert(owner_id);
        Some(OwnerGuard {
            locks: self,
            owner_id,
        })
    }

    /// True while some guard holds `owner_id`.
    pub fn is_held(&self, owner_id: ProductId) -> bool {
        self.held().contains(&owner_id)
    }

    fn held(&self) -> MutexGuard<'_, HashSet<ProductId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
