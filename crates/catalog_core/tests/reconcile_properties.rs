use catalog_core::{
    reconcile, MemoryAssociationStore, ReconcileError, StoreError, StoreFault, WritePhase,
};
use std::collections::BTreeSet;

const OWNER: i64 = 42;

fn store_with(links: &[(i64, i64)]) -> MemoryAssociationStore {
    let mut store = MemoryAssociationStore::new();
    for &(association_id, target_id) in links {
        store.seed(association_id, OWNER, target_id);
    }
    store.reset_calls();
    store
}

#[test]
fn concrete_scenario_keeps_shared_row_and_swaps_the_rest() {
    let mut store = store_with(&[(10, 1), (11, 2)]);
    let kept_before = store.rows_for(OWNER)[1].clone();

    let result = reconcile(&mut store, OWNER, &BTreeSet::from([2, 3])).unwrap();
    assert_eq!(result.added, vec![3]);
    assert_eq!(result.removed, vec![10]);
    assert_eq!(result.inserted.len(), 1);

    let rows = store.rows_for(OWNER);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], kept_before);
    assert_eq!(rows[1].association_id, result.inserted[0]);
    assert_eq!(rows[1].target_id, 3);
}

#[test]
fn second_run_with_same_desired_set_is_a_noop() {
    let mut store = store_with(&[(1, 5), (2, 6)]);
    let desired = BTreeSet::from([6, 7, 8]);

    let first = reconcile(&mut store, OWNER, &desired).unwrap();
    assert!(!first.is_noop());
    assert_eq!(store.target_ids(OWNER), desired);

    store.reset_calls();
    let second = reconcile(&mut store, OWNER, &desired).unwrap();
    assert!(second.added.is_empty());
    assert!(second.removed.is_empty());
    assert_eq!(store.calls().writes(), 0);
    assert_eq!(store.target_ids(OWNER), desired);
}

#[test]
fn converges_from_any_current_subset_to_any_desired_subset() {
    let universe: Vec<i64> = (1..=4).collect();
    let subset = |mask: u32| -> BTreeSet<i64> {
        universe
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, &target)| target)
            .collect()
    };

    for current_mask in 0u32..16 {
        for desired_mask in 0u32..16 {
            let current = subset(current_mask);
            let desired = subset(desired_mask);
            let links: Vec<(i64, i64)> = current
                .iter()
                .map(|&target| (100 + target, target))
                .collect();
            let mut store = store_with(&links);

            let result = reconcile(&mut store, OWNER, &desired).unwrap();

            assert_eq!(store.target_ids(OWNER), desired);
            let expected_add: Vec<i64> = desired.difference(&current).copied().collect();
            let expected_remove: Vec<i64> = current
                .difference(&desired)
                .map(|&target| 100 + target)
                .collect();
            assert_eq!(result.added, expected_add);
            assert_eq!(result.removed, expected_remove);
            for target in current.intersection(&desired) {
                assert!(store
                    .rows_for(OWNER)
                    .iter()
                    .any(|row| row.association_id == 100 + target && row.target_id == *target));
            }
        }
    }
}

#[test]
fn empty_desired_set_clears_all_rows_without_inserting() {
    let mut store = store_with(&[(1, 1), (2, 2), (3, 3)]);

    let result = reconcile(&mut store, OWNER, &BTreeSet::new()).unwrap();
    assert!(result.added.is_empty());
    assert_eq!(result.removed, vec![1, 2, 3]);
    assert!(store.rows_for(OWNER).is_empty());
    assert_eq!(store.calls().insert, 0);
    assert_eq!(store.calls().delete, 1);
}

#[test]
fn matching_state_issues_no_writes() {
    let mut store = store_with(&[(1, 1), (2, 2)]);

    let result = reconcile(&mut store, OWNER, &BTreeSet::from([1, 2])).unwrap();
    assert!(result.is_noop());
    assert_eq!(store.calls().fetch, 1);
    assert_eq!(store.calls().insert, 0);
    assert_eq!(store.calls().delete, 0);
}

#[test]
fn duplicate_desired_ids_collapse_to_one_link() {
    let mut store = MemoryAssociationStore::new();
    let desired: BTreeSet<i64> = vec![4, 4, 9, 4].into_iter().collect();

    let result = reconcile(&mut store, OWNER, &desired).unwrap();
    assert_eq!(result.added, vec![4, 9]);
    assert_eq!(store.rows_for(OWNER).len(), 2);
}

#[test]
fn other_owners_are_untouched() {
    let mut store = MemoryAssociationStore::new();
    store.seed(1, OWNER, 1);
    store.seed(2, OWNER + 1, 1);

    reconcile(&mut store, OWNER, &BTreeSet::new()).unwrap();
    assert!(store.rows_for(OWNER).is_empty());
    assert_eq!(store.target_ids(OWNER + 1), BTreeSet::from([1]));
}

#[test]
fn fetch_failure_is_persistence_error_and_writes_nothing() {
    let mut store = store_with(&[(1, 1)]);
    store.fail_next_fetch(StoreFault::Unavailable);

    let err = reconcile(&mut store, OWNER, &BTreeSet::from([2])).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Persistence(StoreError::Unavailable(_))
    ));
    assert_eq!(store.calls().writes(), 0);
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([1]));
}

#[test]
fn failed_delete_after_successful_insert_is_reported_as_partial() {
    let mut store = store_with(&[(10, 1), (11, 2)]);
    store.fail_next_delete(StoreFault::Unavailable);

    let err = reconcile(&mut store, OWNER, &BTreeSet::from([2, 3])).unwrap_err();
    match err {
        ReconcileError::PartialReconciliation {
            succeeded_phase,
            to_add,
            to_remove,
            ..
        } => {
            assert_eq!(succeeded_phase, WritePhase::Insert);
            assert_eq!(to_add, vec![3]);
            assert_eq!(to_remove, vec![10]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([1, 2, 3]));

    let retry = reconcile(&mut store, OWNER, &BTreeSet::from([2, 3])).unwrap();
    assert!(retry.added.is_empty());
    assert_eq!(retry.removed, vec![10]);
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([2, 3]));
}

#[test]
fn failed_insert_with_successful_delete_is_reported_as_partial() {
    let mut store = store_with(&[(10, 1), (11, 2)]);
    store.fail_next_insert(StoreFault::Unavailable);

    let err = reconcile(&mut store, OWNER, &BTreeSet::from([2, 3])).unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        ReconcileError::PartialReconciliation {
            succeeded_phase: WritePhase::Delete,
            ..
        }
    ));
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([2]));

    reconcile(&mut store, OWNER, &BTreeSet::from([2, 3])).unwrap();
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([2, 3]));
}

#[test]
fn single_phase_failure_is_not_partial() {
    let mut store = store_with(&[(10, 1)]);
    store.fail_next_insert(StoreFault::Unavailable);

    let err = reconcile(&mut store, OWNER, &BTreeSet::from([1, 2])).unwrap_err();
    assert!(matches!(err, ReconcileError::Persistence(_)));
    assert_eq!(store.calls().delete, 0);
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([1]));
}

#[test]
fn both_phases_failing_reports_nothing_applied() {
    let mut store = store_with(&[(10, 1)]);
    store.fail_next_insert(StoreFault::Unavailable);
    store.fail_next_delete(StoreFault::Unavailable);

    let err = reconcile(&mut store, OWNER, &BTreeSet::from([2])).unwrap_err();
    assert!(matches!(err, ReconcileError::Persistence(_)));
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([1]));
}

#[test]
fn store_conflicts_surface_as_conflict_errors() {
    let mut store = store_with(&[(10, 1)]);
    store.fail_next_fetch(StoreFault::Conflict);

    let err = reconcile(&mut store, OWNER, &BTreeSet::from([2])).unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict(_)));
    assert!(err.is_retryable());

    store.fail_next_insert(StoreFault::Conflict);
    let err = reconcile(&mut store, OWNER, &BTreeSet::from([1, 2])).unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict(_)));
}

#[test]
fn duplicate_insert_is_rejected_atomically_by_the_store() {
    use catalog_core::{AssociationStore, NewAssociation};

    let mut store = store_with(&[(1, 1)]);
    let err = store
        .insert_batch(&[
            NewAssociation {
                owner_id: OWNER,
                target_id: 2,
            },
            NewAssociation {
                owner_id: OWNER,
                target_id: 1,
            },
        ])
        .unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
    assert_eq!(store.target_ids(OWNER), BTreeSet::from([1]));
}

#[test]
fn reconciliation_result_serializes_added_and_removed() {
    let mut store = store_with(&[(10, 1)]);
    let result = reconcile(&mut store, OWNER, &BTreeSet::from([5])).unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["added"], serde_json::json!([5]));
    assert_eq!(json["removed"], serde_json::json!([10]));
}
