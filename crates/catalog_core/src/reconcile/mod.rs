//! Product/tag association reconciliation.
//!
//! # Responsibility
//! - Diff an owner's persisted links against a complete desired tag set.
//! - Apply only the missing inserts and stale deletes through an
//!   `AssociationStore`.
//! - Report half-applied writes explicitly instead of hiding them.
//!
//! # Invariants
//! - `to_add = desired - current` and `to_remove` addresses exactly the rows
//!   whose target is not desired; rows in the intersection are untouched.
//! - `to_add` and the targets behind `to_remove` never overlap.
//! - Empty write batches are never sent to the store.
//! - Re-running a reconciliation against the same desired set converges.

pub mod lock;

use crate::model::association::{AssociationId, AssociationRow, NewAssociation};
use crate::model::product::{ProductId, TagId};
use crate::repo::association_repo::{AssociationStore, StoreError};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub use lock::{OwnerGuard, OwnerLocks};

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Write phase of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePhase {
    Insert,
    Delete,
}

impl Display for WritePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Errors surfaced by `reconcile`.
#[derive(Debug)]
pub enum ReconcileError {
    /// Store rejected or could not run a read or write. Nothing was applied
    /// by this call.
    Persistence(StoreError),
    /// One write phase committed and the other failed. Re-running
    /// `reconcile` with the same desired set is safe and converges.
    PartialReconciliation {
        succeeded_phase: WritePhase,
        to_add: Vec<TagId>,
        to_remove: Vec<AssociationId>,
        source: StoreError,
    },
    /// Concurrent reconciliation of the same owner; retry with backoff.
    Conflict(StoreError),
}

impl ReconcileError {
    /// Classifies a store failure that left nothing applied.
    pub fn from_store(err: StoreError) -> Self {
        if err.is_conflict() {
            Self::Conflict(err)
        } else {
            Self::Persistence(err)
        }
    }

    /// Rewrites the error for a reconciliation whose enclosing transaction
    /// was rolled back: a partial outcome no longer exists.
    pub fn rolled_back(self) -> Self {
        match self {
            Self::PartialReconciliation { source, .. } => Self::from_store(source),
            other => other,
        }
    }

    /// True for errors where retrying the whole call is the expected remedy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::PartialReconciliation { .. }
        )
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "persistence",
            Self::PartialReconciliation { .. } => "partial_reconciliation",
            Self::Conflict(_) => "conflict",
        }
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(err) => write!(f, "persistence error: {err}"),
            Self::PartialReconciliation {
                succeeded_phase,
                to_add,
                to_remove,
                source,
            } => write!(
                f,
                "partial reconciliation: {succeeded_phase} phase applied, other phase failed \
                 (to_add={to_add:?}, to_remove={to_remove:?}): {source}"
            ),
            Self::Conflict(err) => write!(f, "reconciliation conflict: {err}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) | Self::Conflict(err) => Some(err),
            Self::PartialReconciliation { source, .. } => Some(source),
        }
    }
}

/// Diff between persisted links and the desired tag set of one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub owner_id: ProductId,
    /// Desired targets with no existing row.
    pub to_add: BTreeSet<TagId>,
    /// Rows whose target is no longer desired.
    pub to_remove: BTreeSet<AssociationId>,
    /// Targets behind `to_remove`.
    pub removed_targets: BTreeSet<TagId>,
    /// Rows left untouched.
    pub retained: BTreeSet<AssociationId>,
}

impl ReconcilePlan {
    /// True when the persisted state already matches.
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// True when no target is both added and removed.
    pub fn is_disjoint(&self) -> bool {
        self.to_add.is_disjoint(&self.removed_targets)
    }

    fn insert_rows(&self) -> Vec<NewAssociation> {
        self.to_add
            .iter()
            .map(|&target_id| NewAssociation {
                owner_id: self.owner_id,
                target_id,
            })
            .collect()
    }
}

/// Outcome of one successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Target ids that gained a row, ascending.
    pub added: Vec<TagId>,
    /// Association ids that were deleted, ascending.
    pub removed: Vec<AssociationId>,
    /// Association ids created for `added`, ascending.
    pub inserted: Vec<AssociationId>,
}

impl ReconciliationResult {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Computes the minimal insert/delete sets for one owner.
///
/// Pure: does not touch storage.
pub fn plan(
    owner_id: ProductId,
    current: &[AssociationRow],
    desired: &BTreeSet<TagId>,
) -> ReconcilePlan {
    let current_targets: BTreeSet<TagId> = current.iter().map(|row| row.target_id).collect();
    let mut plan = ReconcilePlan {
        owner_id,
        to_add: desired.difference(&current_targets).copied().collect(),
        ..ReconcilePlan::default()
    };

    for row in current {
        if desired.contains(&row.target_id) {
            plan.retained.insert(row.association_id);
        } else {
            plan.to_remove.insert(row.association_id);
            plan.removed_targets.insert(row.target_id);
        }
    }

    debug_assert!(plan.is_disjoint());
    plan
}

/// Reconciles the links of `owner_id` so they match `desired` exactly.
///
/// Reads the current rows, diffs them and applies the result with `apply`.
///
/// # Errors
/// - `Conflict` / `Persistence` when the read fails or every issued write
///   fails; nothing was applied.
/// - `PartialReconciliation` when exactly one of the two writes failed.
pub fn reconcile<S>(
    store: &mut S,
    owner_id: ProductId,
    desired: &BTreeSet<TagId>,
) -> ReconcileResult<ReconciliationResult>
where
    S: AssociationStore + ?Sized,
{
    let run_id = Uuid::new_v4();
    let started_at = Instant::now();
    debug!(
        "event=reconcile module=reconcile status=start run_id={run_id} owner_id={owner_id} desired_count={}",
        desired.len()
    );

    let outcome = store
        .fetch_current(owner_id)
        .map_err(ReconcileError::from_store)
        .and_then(|current| {
            let plan = plan(owner_id, &current, desired);
            debug!(
                "event=reconcile_plan module=reconcile run_id={run_id} owner_id={owner_id} current_count={} to_add={} to_remove={} retained={}",
                current.len(),
                plan.to_add.len(),
                plan.to_remove.len(),
                plan.retained.len()
            );
            apply(store, &plan)
        });

    match &outcome {
        Ok(result) => info!(
            "event=reconcile module=reconcile status=ok run_id={run_id} owner_id={owner_id} added={} removed={} duration_ms={}",
            result.added.len(),
            result.removed.len(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=reconcile module=reconcile status=error run_id={run_id} owner_id={owner_id} error_code={} duration_ms={} error={err}",
            err.code(),
            started_at.elapsed().as_millis()
        ),
    }

    outcome
}

/// Applies a precomputed plan.
///
/// Both writes are issued even when the first one fails, since they do not
/// depend on each other; empty batches are skipped.
pub fn apply<S>(store: &mut S, plan: &ReconcilePlan) -> ReconcileResult<ReconciliationResult>
where
    S: AssociationStore + ?Sized,
{
    let insert_outcome = if plan.to_add.is_empty() {
        None
    } else {
        Some(store.insert_batch(&plan.insert_rows()))
    };
    let delete_outcome = if plan.to_remove.is_empty() {
        None
    } else {
        Some(store.delete_batch(&plan.to_remove))
    };

    let partial = |succeeded_phase, source| ReconcileError::PartialReconciliation {
        succeeded_phase,
        to_add: plan.to_add.iter().copied().collect(),
        to_remove: plan.to_remove.iter().copied().collect(),
        source,
    };

    let inserted = match (insert_outcome, delete_outcome) {
        (Some(Err(insert_err)), Some(Err(delete_err))) => {
            error!(
                "event=reconcile_apply module=reconcile status=error owner_id={} phase=delete error={delete_err}",
                plan.owner_id
            );
            return Err(ReconcileError::from_store(insert_err));
        }
        (Some(Err(insert_err)), Some(Ok(_))) => {
            return Err(partial(WritePhase::Delete, insert_err));
        }
        (Some(Ok(_)), Some(Err(delete_err))) => {
            return Err(partial(WritePhase::Insert, delete_err));
        }
        (Some(Err(err)), None) | (None, Some(Err(err))) => {
            return Err(ReconcileError::from_store(err));
        }
        (Some(Ok(inserted)), _) => inserted,
        (None, _) => Vec::new(),
    };

    Ok(ReconciliationResult {
        added: plan.to_add.iter().copied().collect(),
        removed: plan.to_remove.iter().copied().collect(),
        inserted,
    })
}

#[cfg(test)]
mod tests {
    use super::{plan, ReconcileError, WritePhase};
    use crate::model::association::AssociationRow;
    use crate::repo::association_repo::StoreError;
    use std::collections::BTreeSet;

    fn row(association_id: i64, target_id: i64) -> AssociationRow {
        AssociationRow {
            association_id,
            owner_id: 7,
            target_id,
            created_at: 1_000,
        }
    }

    #[test]
    fn plan_adds_missing_and_removes_stale_rows() {
        let current = vec![row(10, 1), row(11, 2)];
        let desired = BTreeSet::from([2, 3]);

        let plan = plan(7, &current, &desired);
        assert_eq!(plan.to_add, BTreeSet::from([3]));
        assert_eq!(plan.to_remove, BTreeSet::from([10]));
        assert_eq!(plan.removed_targets, BTreeSet::from([1]));
        assert_eq!(plan.retained, BTreeSet::from([11]));
        assert!(plan.is_disjoint());
    }

    #[test]
    fn plan_with_empty_desired_set_clears_everything() {
        let current = vec![row(1, 1), row(2, 2), row(3, 3)];
        let plan = plan(7, &current, &BTreeSet::new());
        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn plan_matching_state_is_noop() {
        let current = vec![row(1, 1), row(2, 2)];
        let plan = plan(7, &current, &BTreeSet::from([1, 2]));
        assert!(plan.is_noop());
        assert_eq!(plan.retained, BTreeSet::from([1, 2]));
    }

    #[test]
    fn plan_against_empty_current_adds_all_desired() {
        let plan = plan(7, &[], &BTreeSet::from([4, 5]));
        assert_eq!(plan.to_add, BTreeSet::from([4, 5]));
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn plan_stays_disjoint_across_overlapping_sets() {
        let current: Vec<_> = (1..=6).map(|target| row(100 + target, target)).collect();
        for mask in 0u32..256 {
            let desired: BTreeSet<i64> = (0..8)
                .filter(|bit| mask & (1 << bit) != 0)
                .map(|bit| i64::from(bit) + 1)
                .collect();
            let plan = plan(7, &current, &desired);
            assert!(plan.is_disjoint(), "mask {mask:#010b}");
            assert_eq!(plan.to_remove.len() + plan.retained.len(), current.len());
        }
    }

    #[test]
    fn rolled_back_turns_partial_into_plain_failure() {
        let partial = ReconcileError::PartialReconciliation {
            succeeded_phase: WritePhase::Insert,
            to_add: vec![3],
            to_remove: vec![10],
            source: StoreError::Conflict("locked".to_string()),
        };
        assert!(matches!(partial.rolled_back(), ReconcileError::Conflict(_)));

        let partial = ReconcileError::PartialReconciliation {
            succeeded_phase: WritePhase::Delete,
            to_add: vec![3],
            to_remove: vec![10],
            source: StoreError::Unavailable("gone".to_string()),
        };
        assert!(matches!(
            partial.rolled_back(),
            ReconcileError::Persistence(_)
        ));
    }
}
