//! Behavior every `Store` driver must share. Each test body runs once per
//! driver through the `contract!` macro.

use std::sync::Arc;
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use upgrader_state::*;

fn runtime(id: &str) -> Runtime {
    Runtime {
        runtime_id: id.to_string(),
        instance_id: format!("inst-{id}"),
        global_account_id: "ga-1".to_string(),
        sub_account_id: "sa-1".to_string(),
        region: "eu-west-1".to_string(),
        state: RuntimeState::Provisioned,
        timezone: None,
        maintenance_window: None,
    }
}

fn orchestration(id: &str, minute: i64) -> Orchestration {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
    Orchestration {
        id: id.to_string(),
        kind: OrchestrationType::UpgradeKyma,
        state: OrchestrationState::Pending,
        parameters: OrchestrationParameters::default(),
        description: String::new(),
        created_at: at,
        updated_at: at,
        version: 0,
    }
}

fn operation(id: &str, orch: &str, rt: &str, minute: i64) -> RuntimeOperation {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
    RuntimeOperation::for_runtime(
        id.to_string(),
        OperationKind::UpgradeKyma,
        orch,
        &runtime(rt),
        at,
    )
}

// ── Contract bodies ────────────────────────────────────────────────

fn get_missing_is_not_found(store: &dyn Store) {
    assert!(store.get_orchestration("nope").unwrap_err().is_not_found());
    assert!(store.get_operation("nope").unwrap_err().is_not_found());
    assert!(store.get_runtime("nope").unwrap_err().is_not_found());
}

fn cas_increments_version_and_rejects_stale(store: &dyn Store) {
    let o = orchestration("o1", 0);
    store.insert_orchestration(&o).unwrap();

    let mut next = o.clone();
    next.state = OrchestrationState::InProgress;
    let stored = store.update_orchestration(&next).unwrap();
    assert_eq!(stored.version, 1);

    // Still based on version 0.
    let mut stale = o.clone();
    stale.state = OrchestrationState::Canceling;
    assert!(store.update_orchestration(&stale).unwrap_err().is_conflict());

    let current = store.get_orchestration("o1").unwrap();
    assert_eq!(current.state, OrchestrationState::InProgress);
    assert_eq!(current.version, 1);
}

fn update_missing_is_not_found(store: &dyn Store) {
    let op = operation("ghost", "o1", "r1", 0);
    assert!(store.update_operation(&op).unwrap_err().is_not_found());
}

fn duplicate_ids_rejected(store: &dyn Store) {
    store.insert_orchestration(&orchestration("o1", 0)).unwrap();
    assert!(matches!(
        store.insert_orchestration(&orchestration("o1", 1)),
        Err(StateError::AlreadyExists(_))
    ));

    store.insert_operation(&operation("op-1", "o1", "r1", 0)).unwrap();
    let mut other_kind = operation("op-1", "o2", "r9", 0);
    other_kind.kind = OperationKind::Provisioning;
    assert!(matches!(
        store.insert_operation(&other_kind),
        Err(StateError::AlreadyExists(_))
    ));
}

fn one_live_operation_per_runtime(store: &dyn Store) {
    let first = operation("op-1", "o1", "r1", 0);
    store.insert_operation(&first).unwrap();
    assert!(matches!(
        store.insert_operation(&operation("op-2", "o1", "r1", 1)),
        Err(StateError::AlreadyExists(_))
    ));
    // Same runtime under another orchestration is fine.
    store.insert_operation(&operation("op-3", "o2", "r1", 1)).unwrap();

    // Once terminal, the pair frees up.
    let mut done = first.clone();
    done.state = OperationState::Failed;
    store.update_operation(&done).unwrap();
    store.insert_operation(&operation("op-4", "o1", "r1", 2)).unwrap();

    // Reviving the old one now collides with op-4.
    let mut revived = store.get_operation("op-1").unwrap();
    revived.state = OperationState::Pending;
    assert!(store.update_operation(&revived).unwrap_err().is_conflict());
}

fn pagination_orders_by_creation(store: &dyn Store) {
    // Inserted out of order; ties on created_at break by id.
    for (id, minute) in [("c", 2), ("a", 0), ("e", 3), ("b", 2), ("d", 1)] {
        store.insert_orchestration(&orchestration(id, minute)).unwrap();
    }
    let filter = OrchestrationFilter::default();
    let first = store.list_orchestrations(&filter, Page::new(1, 2)).unwrap();
    let second = store.list_orchestrations(&filter, Page::new(2, 2)).unwrap();
    let third = store.list_orchestrations(&filter, Page::new(3, 2)).unwrap();

    let ids = |p: &PageResult<Orchestration>| -> Vec<String> {
        p.items.iter().map(|o| o.id.clone()).collect()
    };
    assert_eq!(ids(&first), vec!["a", "d"]);
    assert_eq!(ids(&second), vec!["b", "c"]);
    assert_eq!(ids(&third), vec!["e"]);
    assert_eq!(first.total_count, 5);
    assert_eq!(third.count, 1);

    let beyond = store.list_orchestrations(&filter, Page::new(9, 2)).unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total_count, 5);
}

fn filters_and_stats(store: &dyn Store) {
    for (i, rt) in ["r1", "r2", "r3"].iter().enumerate() {
        store
            .insert_operation(&operation(&format!("op-{rt}"), "o1", rt, i as i64))
            .unwrap();
    }
    store.insert_operation(&operation("other", "o2", "r1", 5)).unwrap();

    let mut failed = store.get_operation("op-r2").unwrap();
    failed.state = OperationState::Failed;
    store.update_operation(&failed).unwrap();

    let failed_only = store
        .list_operations(
            &OperationFilter::for_orchestration("o1").with_states(&[OperationState::Failed]),
            Page::all(),
        )
        .unwrap();
    assert_eq!(failed_only.total_count, 1);
    assert_eq!(failed_only.items[0].id, "op-r2");

    let stats = store
        .operation_stats(&StatsScope::Orchestration("o1".to_string()))
        .unwrap();
    assert_eq!(stats.get(&OperationState::Pending), Some(&2));
    assert_eq!(stats.get(&OperationState::Failed), Some(&1));
    assert_eq!(stats.values().sum::<u64>(), 3);

    let global = store.operation_stats(&StatsScope::Global).unwrap();
    assert_eq!(global.values().sum::<u64>(), 4);

    let by_kind = store.operation_stats_by_kind().unwrap();
    assert_eq!(by_kind[&OperationKind::UpgradeKyma].values().sum::<u64>(), 4);
}

fn runtime_history_and_batch_get(store: &dyn Store) {
    store.insert_operation(&operation("late", "o2", "r1", 9)).unwrap();
    store.insert_operation(&operation("early", "o1", "r1", 1)).unwrap();
    store.insert_operation(&operation("elsewhere", "o1", "r2", 0)).unwrap();

    let history: Vec<String> = store
        .list_operations_for_runtime("r1")
        .unwrap()
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(history, vec!["early", "late"]);

    let ids = vec!["late".to_string(), "missing".to_string(), "early".to_string()];
    let fetched: Vec<String> = store
        .get_operations(&ids)
        .unwrap()
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(fetched, vec!["late", "early"]);
}

fn reads_are_snapshots(store: &dyn Store) {
    store.insert_orchestration(&orchestration("o1", 0)).unwrap();
    let mut copy = store.get_orchestration("o1").unwrap();
    copy.description = "mutated locally".to_string();
    assert_eq!(store.get_orchestration("o1").unwrap().description, "");
}

fn runtime_upsert(store: &dyn Store) {
    let mut rt = runtime("r1");
    store.put_runtime(&rt).unwrap();
    rt.state = RuntimeState::Deprovisioning;
    store.put_runtime(&rt).unwrap();
    assert_eq!(
        store.get_runtime("r1").unwrap().state,
        RuntimeState::Deprovisioning
    );
    assert_eq!(store.list_runtimes().unwrap().len(), 1);
}

fn concurrent_modifications_all_land(store: Arc<dyn Store>) {
    store.insert_operation(&operation("op-1", "o1", "r1", 0)).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut landed = 0;
                while landed < 5 {
                    match modify_operation(store.as_ref(), "op-1", |op| {
                        op.attempt += 1;
                        true
                    }) {
                        Ok(_) => landed += 1,
                        // Gave up after CAS_ATTEMPTS under contention; go again.
                        Err(e) if e.is_conflict() => {}
                        Err(e) => panic!("unexpected store error: {e}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let op = store.get_operation("op-1").unwrap();
    assert_eq!(op.attempt, 20);
    assert_eq!(op.version, 20);
}

fn modify_can_decline(store: &dyn Store) {
    store.insert_operation(&operation("op-1", "o1", "r1", 0)).unwrap();
    let result = modify_operation(store, "op-1", |_| false).unwrap();
    assert!(result.is_none());
    assert_eq!(store.get_operation("op-1").unwrap().version, 0);
}

macro_rules! contract {
    ($driver:ident, $make:expr) => {
        mod $driver {
            use super::*;

            fn store() -> Arc<dyn Store> {
                Arc::new($make)
            }

            #[test]
            fn get_missing_is_not_found() {
                super::get_missing_is_not_found(store().as_ref());
            }

            #[test]
            fn cas_increments_version_and_rejects_stale() {
                super::cas_increments_version_and_rejects_stale(store().as_ref());
            }

            #[test]
            fn update_missing_is_not_found() {
                super::update_missing_is_not_found(store().as_ref());
            }

            #[test]
            fn duplicate_ids_rejected() {
                super::duplicate_ids_rejected(store().as_ref());
            }

            #[test]
            fn one_live_operation_per_runtime() {
                super::one_live_operation_per_runtime(store().as_ref());
            }

            #[test]
            fn pagination_orders_by_creation() {
                super::pagination_orders_by_creation(store().as_ref());
            }

            #[test]
            fn filters_and_stats() {
                super::filters_and_stats(store().as_ref());
            }

            #[test]
            fn runtime_history_and_batch_get() {
                super::runtime_history_and_batch_get(store().as_ref());
            }

            #[test]
            fn reads_are_snapshots() {
                super::reads_are_snapshots(store().as_ref());
            }

            #[test]
            fn runtime_upsert() {
                super::runtime_upsert(store().as_ref());
            }

            #[test]
            fn concurrent_modifications_all_land() {
                super::concurrent_modifications_all_land(store());
            }

            #[test]
            fn modify_can_decline() {
                super::modify_can_decline(store().as_ref());
            }
        }
    };
}

contract!(memory, MemoryStore::new());
contract!(redb_in_memory, RedbStore::open_in_memory().unwrap());

#[test]
fn redb_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.redb");
    {
        let store = RedbStore::open(&path).unwrap();
        store.insert_orchestration(&orchestration("o1", 0)).unwrap();
        store.insert_operation(&operation("op-1", "o1", "r1", 0)).unwrap();
    }
    let store = RedbStore::open(&path).unwrap();
    assert_eq!(store.get_orchestration("o1").unwrap().id, "o1");
    // The live index is durable too.
    assert!(store.insert_operation(&operation("op-2", "o1", "r1", 1)).is_err());
}

// ── Properties ─────────────────────────────────────────────────────

proptest! {
    /// Replaying writers with arbitrary base versions: exactly the writes
    /// based on the current version land, and the stored version counts them.
    #[test]
    fn cas_accepts_only_current_version(bases in proptest::collection::vec(0u64..6, 1..30)) {
        let store = MemoryStore::new();
        store.insert_orchestration(&orchestration("o1", 0)).unwrap();
        let mut expected = 0u64;
        for base in bases {
            let mut attempt = store.get_orchestration("o1").unwrap();
            attempt.version = base;
            let result = store.update_orchestration(&attempt);
            if base == expected {
                prop_assert_eq!(result.unwrap().version, expected + 1);
                expected += 1;
            } else {
                prop_assert!(result.unwrap_err().is_conflict());
            }
        }
        prop_assert_eq!(store.get_orchestration("o1").unwrap().version, expected);
    }

    /// Pages concatenate to the full ordered listing for any page size.
    #[test]
    fn pages_partition_listing(minutes in proptest::collection::vec(0i64..5, 0..20), size in 1u32..7) {
        let store = MemoryStore::new();
        for (i, minute) in minutes.iter().enumerate() {
            store.insert_orchestration(&orchestration(&format!("o{i:02}"), *minute)).unwrap();
        }
        let filter = OrchestrationFilter::default();
        let all = store.list_orchestrations(&filter, Page::all()).unwrap();
        let mut stitched = Vec::new();
        let mut page = 1;
        loop {
            let result = store.list_orchestrations(&filter, Page::new(page, size)).unwrap();
            if result.items.is_empty() {
                break;
            }
            stitched.extend(result.items);
            page += 1;
        }
        prop_assert_eq!(stitched, all.items);
    }
}
