//! End-to-end orchestration scenarios against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Timelike, Utc};
use parking_lot::Mutex;
use upgrader_core::{ExecutorConfig, OrchestrationConfig, now_utc};
use upgrader_executor::*;
use upgrader_inventory::{InventorySource, StaticInventory};
use upgrader_manager::*;
use upgrader_scheduler::WINDOW_MISSED;
use upgrader_state::*;

// ── Fixtures ───────────────────────────────────────────────────────

/// Shared knobs of the test step chain.
#[derive(Default)]
struct Fleet {
    /// Runtimes whose `upgrade` step fails permanently.
    failing: Mutex<HashSet<String>>,
    /// How long `upgrade` takes.
    work: Mutex<Duration>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

struct Prepare;

#[async_trait]
impl Step for Prepare {
    fn name(&self) -> &str {
        "prepare"
    }

    async fn run(&self, operation: RuntimeOperation, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::done(operation))
    }
}

struct Upgrade(Arc<Fleet>);

#[async_trait]
impl Step for Upgrade {
    fn name(&self) -> &str {
        "upgrade"
    }

    async fn run(&self, operation: RuntimeOperation, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        let fleet = &self.0;
        let now = fleet.running.fetch_add(1, Ordering::SeqCst) + 1;
        fleet.peak.fetch_max(now, Ordering::SeqCst);
        let work = *fleet.work.lock();
        tokio::time::sleep(work).await;
        fleet.running.fetch_sub(1, Ordering::SeqCst);

        if fleet.failing.lock().contains(&operation.runtime_id) {
            return Err(StepError::permanent(anyhow::anyhow!("upgrade rejected")));
        }
        Ok(StepOutput::done(operation))
    }
}

fn runtime(id: &str) -> Runtime {
    Runtime {
        runtime_id: id.to_string(),
        instance_id: format!("inst-{id}"),
        global_account_id: "ga".to_string(),
        sub_account_id: "sa".to_string(),
        region: "eu-west-1".to_string(),
        state: RuntimeState::Provisioned,
        timezone: None,
        maintenance_window: None,
    }
}

fn fleet_of(n: usize) -> Vec<Runtime> {
    (1..=n).map(|i| runtime(&format!("rt-{i:02}"))).collect()
}

struct Harness {
    manager: OrchestrationManager,
    store: Arc<dyn Store>,
    fleet: Arc<Fleet>,
}

fn harness_with(inventory: Arc<dyn InventorySource>) -> Harness {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let fleet = Arc::new(Fleet {
        work: Mutex::new(Duration::from_secs(1)),
        ..Default::default()
    });
    let steps: Vec<Arc<dyn Step>> = vec![Arc::new(Prepare), Arc::new(Upgrade(Arc::clone(&fleet)))];
    let registry = StepRegistry::new().with(OperationCapability::new(OperationKind::UpgradeKyma, steps));
    let executor_config = ExecutorConfig {
        backoff_jitter: 0.0,
        ..Default::default()
    };
    let executor = Executor::new(Arc::clone(&store), Arc::new(registry), &executor_config);
    let manager = OrchestrationManager::new(
        Arc::clone(&store),
        inventory,
        Arc::new(executor),
        OrchestrationConfig::default(),
    );
    Harness {
        manager,
        store,
        fleet,
    }
}

fn harness(runtimes: Vec<Runtime>) -> Harness {
    harness_with(Arc::new(StaticInventory::new(runtimes)))
}

fn all_targets() -> TargetSpec {
    TargetSpec {
        include: vec![TargetSelector::All],
        exclude: vec![],
    }
}

fn parallel(workers: u32) -> OrchestrationParameters {
    OrchestrationParameters {
        targets: all_targets(),
        strategy: StrategySpec {
            workers: Some(workers),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Wait until `id` is terminal and its driver has exited.
async fn settle(manager: &OrchestrationManager, id: &str) -> Orchestration {
    for _ in 0..100_000 {
        let o = manager.store().get_orchestration(id).unwrap();
        if o.state.is_terminal() && !manager.is_driving(id) {
            return o;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("orchestration {id} never settled");
}

fn operations(store: &dyn Store, id: &str) -> Vec<RuntimeOperation> {
    store
        .list_operations(&OperationFilter::for_orchestration(id), Page::all())
        .unwrap()
        .items
}

fn by_runtime<'a>(ops: &'a [RuntimeOperation], runtime_id: &str) -> &'a RuntimeOperation {
    ops.iter().find(|op| op.runtime_id == runtime_id).unwrap()
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn happy_path_parallel() {
    let h = harness(fleet_of(3));
    let o = h
        .manager
        .submit(OrchestrationType::UpgradeKyma, parallel(2))
        .unwrap();
    assert_eq!(o.state, OrchestrationState::Pending);

    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Succeeded);
    assert!(h.fleet.peak.load(Ordering::SeqCst) <= 2);

    let status = h.manager.get(&o.id).unwrap();
    assert_eq!(status.stats.get(&OperationState::Succeeded), Some(&3));
    assert_eq!(status.stats.len(), 1);
    for op in operations(h.store.as_ref(), &o.id) {
        assert_eq!(op.state, OperationState::Succeeded);
        assert_eq!(op.step_cursor, None);
    }
}

#[tokio::test(start_paused = true)]
async fn canary_failure_aborts_remainder() {
    let h = harness(fleet_of(10));
    h.fleet.failing.lock().insert("rt-01".to_string());

    let parameters = OrchestrationParameters {
        targets: all_targets(),
        strategy: StrategySpec {
            kind: StrategyType::Canary,
            workers: Some(4),
            canary_percent: Some(20),
            ..Default::default()
        },
        ..Default::default()
    };
    let o = h.manager.submit(OrchestrationType::UpgradeKyma, parameters).unwrap();

    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Failed);

    let ops = operations(h.store.as_ref(), &o.id);
    assert_eq!(by_runtime(&ops, "rt-01").state, OperationState::Failed);
    assert!(
        by_runtime(&ops, "rt-01")
            .error_message
            .as_deref()
            .unwrap()
            .contains("upgrade rejected")
    );
    assert_eq!(by_runtime(&ops, "rt-02").state, OperationState::Succeeded);
    for i in 3..=10 {
        let op = by_runtime(&ops, &format!("rt-{i:02}"));
        assert_eq!(op.state, OperationState::Canceled, "{}", op.runtime_id);
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_flight() {
    let h = harness(fleet_of(5));
    *h.fleet.work.lock() = Duration::from_secs(10);
    let o = h
        .manager
        .submit(OrchestrationType::UpgradeKyma, parallel(2))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.store.get_orchestration(&o.id).unwrap().state,
        OrchestrationState::InProgress
    );
    let canceling = h.manager.cancel(&o.id).unwrap();
    assert_eq!(canceling.state, OrchestrationState::Canceling);

    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Canceled);
    let ops = operations(h.store.as_ref(), &o.id);
    assert_eq!(ops.len(), 5);
    assert!(ops.iter().all(|op| op.state == OperationState::Canceled));

    // A second cancel is a no-op.
    let again = h.manager.cancel(&o.id).unwrap();
    assert_eq!(again.state, OrchestrationState::Canceled);
    assert_eq!(again.version, done.version);
}

#[tokio::test(start_paused = true)]
async fn retry_resets_only_selected_failures() {
    let h = harness(vec![runtime("rt-a"), runtime("rt-b")]);
    h.fleet.failing.lock().insert("rt-b".to_string());
    let o = h
        .manager
        .submit(OrchestrationType::UpgradeKyma, parallel(2))
        .unwrap();
    assert_eq!(settle(&h.manager, &o.id).await.state, OrchestrationState::Failed);

    let ops = operations(h.store.as_ref(), &o.id);
    let a = by_runtime(&ops, "rt-a").clone();
    let b = by_runtime(&ops, "rt-b").clone();
    assert_eq!(a.state, OperationState::Succeeded);
    assert_eq!(b.state, OperationState::Failed);

    h.fleet.failing.lock().clear();
    let outcome = h
        .manager
        .retry(&o.id, &[b.id.clone(), a.id.clone(), "missing".to_string()])
        .unwrap();
    assert_eq!(outcome.retried, vec![b.id.clone()]);
    assert_eq!(outcome.invalid.len(), 2);

    // The driver has not run yet on this single-threaded runtime.
    let reset = h.store.get_operation(&b.id).unwrap();
    assert_eq!(reset.state, OperationState::Pending);
    assert_eq!(reset.step_cursor.as_deref(), Some("prepare"));
    assert_eq!(reset.attempt, 0);
    assert_eq!(reset.error_message, None);
    assert_eq!(
        h.store.get_orchestration(&o.id).unwrap().state,
        OrchestrationState::Retrying
    );

    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Succeeded);
    assert_eq!(h.store.get_operation(&b.id).unwrap().state, OperationState::Succeeded);
    assert_eq!(h.store.get_operation(&a.id).unwrap(), a);
}

// ── Edges ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_resolution_succeeds() {
    let h = harness(vec![]);
    let o = h
        .manager
        .submit(OrchestrationType::UpgradeKyma, parallel(1))
        .unwrap();
    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Succeeded);
    assert!(operations(h.store.as_ref(), &o.id).is_empty());
}

struct BrokenInventory;

impl InventorySource for BrokenInventory {
    fn list_runtimes(&self) -> anyhow::Result<Vec<Runtime>> {
        anyhow::bail!("inventory unavailable")
    }
}

#[tokio::test(start_paused = true)]
async fn resolve_failure_fails_orchestration() {
    let h = harness_with(Arc::new(BrokenInventory));
    let o = h
        .manager
        .submit(OrchestrationType::UpgradeKyma, parallel(1))
        .unwrap();
    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Failed);
    assert!(done.description.contains("inventory unavailable"));
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let h = harness(fleet_of(1));

    let no_targets = OrchestrationParameters::default();
    assert!(matches!(
        h.manager.submit(OrchestrationType::UpgradeKyma, no_targets),
        Err(ManagerError::InvalidSelector(_))
    ));

    let bad_regex = OrchestrationParameters {
        targets: TargetSpec {
            include: vec![TargetSelector::Match(RuntimeMatcher {
                region: Some("(".to_string()),
                ..Default::default()
            })],
            exclude: vec![],
        },
        ..Default::default()
    };
    assert!(matches!(
        h.manager.submit(OrchestrationType::UpgradeKyma, bad_regex),
        Err(ManagerError::InvalidSelector(_))
    ));

    let no_percent = OrchestrationParameters {
        targets: all_targets(),
        strategy: StrategySpec {
            kind: StrategyType::Canary,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(matches!(
        h.manager.submit(OrchestrationType::UpgradeKyma, no_percent),
        Err(ManagerError::InvalidParameters(_))
    ));

    assert!(matches!(h.manager.cancel("nope"), Err(ManagerError::NotFound(_))));
    assert!(matches!(h.manager.page(Some(1), Some(0)), Err(ManagerError::InvalidParameters(_))));
    assert!(matches!(
        h.manager.page(None, Some(5000)),
        Err(ManagerError::InvalidParameters(_))
    ));
    assert_eq!(h.manager.page(None, None).unwrap(), Page::new(1, 100));
}

#[tokio::test(start_paused = true)]
async fn cancel_after_success_is_rejected() {
    let h = harness(fleet_of(1));
    let o = h
        .manager
        .submit(OrchestrationType::UpgradeKyma, parallel(1))
        .unwrap();
    assert_eq!(settle(&h.manager, &o.id).await.state, OrchestrationState::Succeeded);
    assert!(matches!(h.manager.cancel(&o.id), Err(ManagerError::AlreadyTerminal(_))));
    assert!(matches!(h.manager.retry(&o.id, &[]), Err(ManagerError::Conflict(_))));
}

#[tokio::test(start_paused = true)]
async fn missed_window_cancels_operation() {
    let h = harness(fleet_of(1));
    let start = (Utc::now() + chrono::Duration::hours(3)).time();
    let start = NaiveTime::from_hms_opt(start.hour(), start.minute(), 0).unwrap();
    let parameters = OrchestrationParameters {
        targets: all_targets(),
        strategy: StrategySpec {
            schedule: ScheduleType::Maintenance,
            maintenance_window: Some(MaintenanceWindow {
                start,
                end: start + chrono::Duration::hours(1),
                allowed_days: vec![],
            }),
            ..Default::default()
        },
        maintenance: MaintenancePolicy {
            fallback_window: None,
            timeout_secs: Some(3600),
        },
        ..Default::default()
    };
    let o = h.manager.submit(OrchestrationType::UpgradeKyma, parameters).unwrap();

    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Succeeded);
    let ops = operations(h.store.as_ref(), &o.id);
    assert_eq!(ops[0].state, OperationState::Canceled);
    assert_eq!(ops[0].description, WINDOW_MISSED);
}

#[tokio::test(start_paused = true)]
async fn canary_missing_its_window_fails_orchestration() {
    let start = (Utc::now() + chrono::Duration::hours(3)).time();
    let start = NaiveTime::from_hms_opt(start.hour(), start.minute(), 0).unwrap();
    let mut runtimes = fleet_of(4);
    runtimes[0].maintenance_window = Some(MaintenanceWindow {
        start,
        end: start + chrono::Duration::hours(1),
        allowed_days: vec![],
    });
    let h = harness(runtimes);

    let parameters = OrchestrationParameters {
        targets: all_targets(),
        strategy: StrategySpec {
            kind: StrategyType::Canary,
            workers: Some(2),
            canary_percent: Some(25),
            schedule: ScheduleType::Maintenance,
            ..Default::default()
        },
        maintenance: MaintenancePolicy {
            fallback_window: None,
            timeout_secs: Some(3600),
        },
        ..Default::default()
    };
    let o = h.manager.submit(OrchestrationType::UpgradeKyma, parameters).unwrap();

    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Failed);
    assert!(done.description.contains("canary"), "{}", done.description);

    let ops = operations(h.store.as_ref(), &o.id);
    let canary = by_runtime(&ops, "rt-01");
    assert_eq!(canary.state, OperationState::Canceled);
    assert_eq!(canary.description, WINDOW_MISSED);
    for i in 2..=4 {
        let op = by_runtime(&ops, &format!("rt-{i:02}"));
        assert_eq!(op.state, OperationState::Canceled, "{}", op.runtime_id);
    }
    assert_eq!(h.fleet.peak.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn oversized_timeout_runs_without_deadline() {
    let h = harness(fleet_of(2));
    let mut parameters = parallel(2);
    parameters.maintenance.timeout_secs = Some(u64::MAX);
    let o = h.manager.submit(OrchestrationType::UpgradeKyma, parameters).unwrap();

    let done = settle(&h.manager, &o.id).await;
    assert_eq!(done.state, OrchestrationState::Succeeded);
    assert_eq!(
        h.manager.get(&o.id).unwrap().stats.get(&OperationState::Succeeded),
        Some(&2)
    );
}

#[tokio::test(start_paused = true)]
async fn resume_picks_up_persisted_work() {
    let h = harness(fleet_of(2));
    let now = now_utc();
    let orphan = Orchestration {
        id: "orch-left-behind".to_string(),
        kind: OrchestrationType::UpgradeKyma,
        state: OrchestrationState::Pending,
        parameters: parallel(1),
        description: String::new(),
        created_at: now,
        updated_at: now,
        version: 0,
    };
    h.store.insert_orchestration(&orphan).unwrap();

    assert_eq!(h.manager.resume_all().unwrap(), 1);
    let done = settle(&h.manager, &orphan.id).await;
    assert_eq!(done.state, OrchestrationState::Succeeded);
    assert_eq!(operations(h.store.as_ref(), &orphan.id).len(), 2);
    assert_eq!(h.manager.resume_all().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn queries_expose_history() {
    let h = harness(fleet_of(2));
    h.manager.put_runtime(&runtime("rt-01")).unwrap();
    let o = h
        .manager
        .submit(OrchestrationType::UpgradeKyma, parallel(2))
        .unwrap();
    settle(&h.manager, &o.id).await;

    let listed = h.manager.list(&OrchestrationFilter::default(), Page::all()).unwrap();
    assert_eq!(listed.total_count, 1);

    let page = h
        .manager
        .operations(&o.id, &[OperationState::Succeeded], Page::new(1, 1))
        .unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.total_count, 2);
    let op = &page.items[0];
    assert_eq!(h.manager.operation(&o.id, &op.id).unwrap(), *op);
    assert!(matches!(h.manager.operation("other", &op.id), Err(ManagerError::NotFound(_))));

    // The store-backed runtime list only knows what was put into it.
    let runtimes = h.manager.runtimes(Page::all()).unwrap();
    assert_eq!(runtimes.total_count, 1);
    assert_eq!(runtimes.items[0].operations.len(), 1);

    let stats = h.manager.stats().unwrap();
    assert_eq!(
        stats[&OperationKind::UpgradeKyma].get(&OperationState::Succeeded),
        Some(&2)
    );
    assert!(matches!(
        h.manager.put_runtime(&runtime(" ")),
        Err(ManagerError::InvalidParameters(_))
    ));
}
