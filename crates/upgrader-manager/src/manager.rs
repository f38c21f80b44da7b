//! Orchestration manager — owns the orchestration state machine.
//!
//! Every non-terminal orchestration has at most one driver task in this
//! process. The driver resolves targets, creates one operation per runtime,
//! hands them to the [`Scheduler`] and closes the orchestration once every
//! operation is terminal. All orchestration writes go through
//! [`modify_orchestration`], so a write only lands when the stored state is
//! still the one the transition starts from.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use upgrader_core::{OrchestrationConfig, new_id, now_utc};
use upgrader_executor::{CancelSignal, Executor, RunContext, cancel_operation};
use upgrader_inventory::{InventorySource, Resolver};
use upgrader_scheduler::{Job, Scheduler, Strategy, effective_window, runtime_timezone};
use upgrader_state::wire::{OrchestrationStatus, RetryOutcome, RuntimeView};
use upgrader_state::*;

use crate::error::{ManagerError, ManagerResult};

const LIVE_OPERATIONS: &[OperationState] = &[OperationState::Pending, OperationState::InProgress];

const LIVE_ORCHESTRATIONS: &[OrchestrationState] = &[
    OrchestrationState::Pending,
    OrchestrationState::InProgress,
    OrchestrationState::Canceling,
    OrchestrationState::Retrying,
];

struct Driver {
    generation: u64,
    cancel: CancelSignal,
    handle: JoinHandle<()>,
}

/// How a driver stopped.
enum DriveExit {
    /// The orchestration reached a terminal state.
    Settled,
    /// Some operations could not be settled; a later resume picks them up.
    Abandoned,
}

/// Outcome of one scheduling pass.
enum Pass {
    /// Nothing left to run, or cancellation was requested.
    Idle,
    Ran,
    Abandoned,
    /// The canary batch did not fully succeed and the remainder was canceled.
    CanaryAborted,
}

struct Inner {
    store: Arc<dyn Store>,
    inventory: Arc<dyn InventorySource>,
    resolver: Resolver,
    executor: Arc<Executor>,
    scheduler: Scheduler,
    config: OrchestrationConfig,
    drivers: Mutex<HashMap<OrchestrationId, Driver>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct OrchestrationManager {
    inner: Arc<Inner>,
}

impl OrchestrationManager {
    pub fn new(
        store: Arc<dyn Store>,
        inventory: Arc<dyn InventorySource>,
        executor: Arc<Executor>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                resolver: Resolver::new(Arc::clone(&inventory)),
                inventory,
                scheduler: Scheduler::new(Arc::clone(&executor)),
                executor,
                config,
                drivers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.inner.config
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Validate and persist a new orchestration, then start driving it.
    pub fn submit(
        &self,
        kind: OrchestrationType,
        parameters: OrchestrationParameters,
    ) -> ManagerResult<Orchestration> {
        parameters
            .strategy
            .validate()
            .map_err(ManagerError::InvalidParameters)?;
        if parameters.maintenance.timeout_secs == Some(0) {
            return Err(ManagerError::InvalidParameters(
                "maintenance.timeoutSecs must be positive".to_string(),
            ));
        }
        Resolver::validate(&parameters.targets)?;

        let now = now_utc();
        let orchestration = Orchestration {
            id: new_id(),
            kind,
            state: OrchestrationState::Pending,
            parameters,
            description: "orchestration scheduled".to_string(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.inner.store.insert_orchestration(&orchestration)?;
        info!(orchestration = %orchestration.id, kind = ?kind, "orchestration submitted");

        self.ensure_driver(&orchestration.id);
        Ok(orchestration)
    }

    /// Request cancellation. Idempotent while the orchestration is
    /// canceling or canceled; other terminal states are rejected.
    pub fn cancel(&self, id: &str) -> ManagerResult<Orchestration> {
        let updated = modify_orchestration(self.inner.store.as_ref(), id, |o| {
            if !o.state.can_transition_to(OrchestrationState::Canceling) {
                return false;
            }
            o.state = OrchestrationState::Canceling;
            o.description = "cancel requested".to_string();
            true
        })?;

        let orchestration = match updated {
            Some(o) => {
                info!(orchestration = %id, "cancel requested");
                o
            }
            None => {
                let o = self.inner.store.get_orchestration(id)?;
                match o.state {
                    OrchestrationState::Canceled => return Ok(o),
                    OrchestrationState::Canceling => o,
                    _ => return Err(ManagerError::AlreadyTerminal(id.to_string())),
                }
            }
        };
        self.ensure_driver(id).trigger();
        Ok(orchestration)
    }

    /// Reset failed operations to pending and drive them again.
    ///
    /// With an empty `operation_ids` every failed operation of the
    /// orchestration is retried. Succeeded operations are never re-run.
    pub fn retry(&self, id: &str, operation_ids: &[OperationId]) -> ManagerResult<RetryOutcome> {
        let store = self.inner.store.as_ref();
        let orchestration = store.get_orchestration(id)?;
        if !retryable(orchestration.state) {
            return Err(ManagerError::Conflict(format!(
                "orchestration {id} is {}, only failed or in-progress orchestrations can be retried",
                orchestration.state
            )));
        }

        let mut outcome = RetryOutcome {
            orchestration_id: id.to_string(),
            ..Default::default()
        };
        let candidates = if operation_ids.is_empty() {
            let filter = OperationFilter::for_orchestration(id).with_states(&[OperationState::Failed]);
            store.list_operations(&filter, Page::all())?.items
        } else {
            let found = store.get_operations(operation_ids)?;
            let known: HashSet<OperationId> = found.iter().map(|op| op.id.clone()).collect();
            outcome.invalid.extend(
                operation_ids
                    .iter()
                    .filter(|requested| !known.contains(*requested))
                    .cloned(),
            );
            found
        };

        let mut selected = Vec::new();
        for op in candidates {
            if op.orchestration_id.as_deref() == Some(id) && op.state == OperationState::Failed {
                selected.push(op);
            } else {
                outcome.invalid.push(op.id);
            }
        }
        if selected.is_empty() {
            info!(orchestration = %id, "no failed operations to retry");
            return Ok(outcome);
        }

        let moved = modify_orchestration(store, id, |o| {
            if !retryable(o.state) {
                return false;
            }
            o.state = OrchestrationState::Retrying;
            o.description = format!("retrying {} failed operations", selected.len());
            true
        })?;
        if moved.is_none() {
            return Err(ManagerError::Conflict(format!(
                "orchestration {id} changed state while the retry was being applied"
            )));
        }

        for op in selected {
            let first_step = self.inner.executor.first_step(op.kind);
            let reset = modify_operation(store, &op.id, |current| {
                if current.state != OperationState::Failed {
                    return false;
                }
                current.state = OperationState::Pending;
                current.step_cursor = first_step.clone();
                current.attempt = 0;
                current.step_started_at = None;
                current.error_message = None;
                current.description = "retry requested".to_string();
                true
            })?;
            match reset {
                Some(_) => outcome.retried.push(op.id),
                None => outcome.invalid.push(op.id),
            }
        }
        info!(
            orchestration = %id,
            retried = outcome.retried.len(),
            invalid = outcome.invalid.len(),
            "retry requested"
        );

        self.ensure_driver(id);
        Ok(outcome)
    }

    /// Start a driver for every orchestration that is not terminal.
    /// Called once at startup to pick up work left by a previous process.
    pub fn resume_all(&self) -> ManagerResult<usize> {
        let filter = OrchestrationFilter {
            states: LIVE_ORCHESTRATIONS.to_vec(),
            ..Default::default()
        };
        let live = self.inner.store.list_orchestrations(&filter, Page::all())?.items;
        for orchestration in &live {
            debug!(orchestration = %orchestration.id, state = %orchestration.state, "resuming");
            self.ensure_driver(&orchestration.id);
        }
        if !live.is_empty() {
            info!(count = live.len(), "resumed orchestrations");
        }
        Ok(live.len())
    }

    /// Insert or replace a runtime in the inventory snapshot.
    pub fn put_runtime(&self, runtime: &Runtime) -> ManagerResult<()> {
        if runtime.runtime_id.trim().is_empty() {
            return Err(ManagerError::InvalidParameters("runtimeId must not be empty".to_string()));
        }
        self.inner.store.put_runtime(runtime)?;
        debug!(runtime = %runtime.runtime_id, state = ?runtime.state, "runtime updated");
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Build a page request, applying the configured default and maximum.
    pub fn page(&self, page: Option<u32>, page_size: Option<u32>) -> ManagerResult<Page> {
        let config = &self.inner.config;
        let page_size = page_size.unwrap_or(config.default_page_size);
        if page_size == 0 || page_size > config.max_page_size {
            return Err(ManagerError::InvalidParameters(format!(
                "pageSize must be within 1..={}",
                config.max_page_size
            )));
        }
        if page == Some(0) {
            return Err(ManagerError::InvalidParameters("page starts at 1".to_string()));
        }
        Ok(Page::new(page.unwrap_or(1), page_size))
    }

    pub fn get(&self, id: &str) -> ManagerResult<OrchestrationStatus> {
        let orchestration = self.inner.store.get_orchestration(id)?;
        let stats = self
            .inner
            .store
            .operation_stats(&StatsScope::Orchestration(id.to_string()))?;
        Ok(OrchestrationStatus {
            orchestration,
            stats,
        })
    }

    pub fn list(
        &self,
        filter: &OrchestrationFilter,
        page: Page,
    ) -> ManagerResult<PageResult<Orchestration>> {
        Ok(self.inner.store.list_orchestrations(filter, page)?)
    }

    /// Operations of orchestration `id`, optionally narrowed to `states`.
    pub fn operations(
        &self,
        id: &str,
        states: &[OperationState],
        page: Page,
    ) -> ManagerResult<PageResult<RuntimeOperation>> {
        self.inner.store.get_orchestration(id)?;
        let filter = OperationFilter::for_orchestration(id).with_states(states);
        Ok(self.inner.store.list_operations(&filter, page)?)
    }

    pub fn operation(&self, orchestration_id: &str, id: &str) -> ManagerResult<RuntimeOperation> {
        let op = self.inner.store.get_operation(id)?;
        if op.orchestration_id.as_deref() != Some(orchestration_id) {
            return Err(ManagerError::NotFound(format!(
                "operation {id} in orchestration {orchestration_id}"
            )));
        }
        Ok(op)
    }

    /// Runtime inventory joined with each runtime's operation history.
    pub fn runtimes(&self, page: Page) -> ManagerResult<PageResult<RuntimeView>> {
        let runtimes = self.inner.store.list_runtimes()?;
        let total_count = runtimes.len();
        let items = runtimes
            .into_iter()
            .skip(page.offset())
            .take(page.page_size as usize)
            .map(|runtime| {
                let operations = self
                    .inner
                    .store
                    .list_operations_for_runtime(&runtime.runtime_id)?;
                Ok(RuntimeView {
                    runtime,
                    operations,
                })
            })
            .collect::<ManagerResult<Vec<_>>>()?;
        Ok(PageResult {
            count: items.len(),
            items,
            total_count,
        })
    }

    /// Operation counts per kind and state across all orchestrations.
    pub fn stats(&self) -> ManagerResult<BTreeMap<OperationKind, OperationStats>> {
        Ok(self.inner.store.operation_stats_by_kind()?)
    }

    /// Whether a driver task is currently running for `id`.
    pub fn is_driving(&self, id: &str) -> bool {
        self.inner
            .drivers
            .lock()
            .get(id)
            .is_some_and(|d| !d.handle.is_finished())
    }

    // ── Driver ─────────────────────────────────────────────────────

    /// Cancel signal of the driver for `id`, spawning one if none runs.
    fn ensure_driver(&self, id: &str) -> CancelSignal {
        let mut drivers = self.inner.drivers.lock();
        if let Some(driver) = drivers.get(id) {
            if !driver.handle.is_finished() {
                return driver.cancel.clone();
            }
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelSignal::new();
        let handle = tokio::spawn(self.clone().run_driver(
            id.to_string(),
            generation,
            cancel.clone(),
        ));
        drivers.insert(
            id.to_string(),
            Driver {
                generation,
                cancel: cancel.clone(),
                handle,
            },
        );
        cancel
    }

    async fn run_driver(self, id: OrchestrationId, generation: u64, cancel: CancelSignal) {
        let span = info_span!("orchestration", orchestration = %id);
        loop {
            let exit = self.drive(&id, &cancel).instrument(span.clone()).await;
            if let Err(e) = &exit {
                span.in_scope(|| error!(error = %e, "orchestration driver stopped"));
            }

            // Decide under the lock, so a retry that lands right after the
            // orchestration settled either sees this driver gone or is
            // picked up by another round.
            let mut drivers = self.inner.drivers.lock();
            let again = matches!(exit, Ok(DriveExit::Settled))
                && self
                    .inner
                    .store
                    .get_orchestration(&id)
                    .is_ok_and(|o| !o.state.is_terminal());
            if again {
                continue;
            }
            if drivers.get(&id).is_some_and(|d| d.generation == generation) {
                drivers.remove(&id);
            }
            break;
        }
    }

    async fn drive(&self, id: &str, cancel: &CancelSignal) -> ManagerResult<DriveExit> {
        let store = self.inner.store.as_ref();
        let orchestration = store.get_orchestration(id)?;
        let timeout = orchestration
            .parameters
            .maintenance
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.inner.config.timeout());
        // Timeouts too large to represent run without a deadline.
        let ctx = RunContext {
            cancel: cancel.clone(),
            deadline: Instant::now().checked_add(timeout),
            dry_run: orchestration.parameters.dry_run,
        };
        debug!(state = %orchestration.state, ?timeout, "driver started");

        loop {
            let orchestration = store.get_orchestration(id)?;
            match orchestration.state {
                OrchestrationState::Succeeded
                | OrchestrationState::Failed
                | OrchestrationState::Canceled => return Ok(DriveExit::Settled),
                OrchestrationState::Pending => self.start(&orchestration)?,
                OrchestrationState::Retrying => {
                    self.transition(
                        id,
                        OrchestrationState::Retrying,
                        OrchestrationState::InProgress,
                        "retrying failed operations",
                    )?;
                }
                OrchestrationState::InProgress => match self.pass(&orchestration, &ctx).await? {
                    Pass::Ran => {}
                    Pass::Idle => self.finish(id)?,
                    Pass::Abandoned => return Ok(DriveExit::Abandoned),
                    Pass::CanaryAborted => {
                        self.transition(
                            id,
                            OrchestrationState::InProgress,
                            OrchestrationState::Failed,
                            "canary batch did not succeed, remaining operations canceled",
                        )?;
                    }
                },
                OrchestrationState::Canceling => {
                    self.cancel_remaining(id)?;
                    self.transition(
                        id,
                        OrchestrationState::Canceling,
                        OrchestrationState::Canceled,
                        "orchestration canceled",
                    )?;
                }
            }
        }
    }

    /// Resolve targets and create the operations of a pending orchestration.
    fn start(&self, orchestration: &Orchestration) -> ManagerResult<()> {
        let id = orchestration.id.as_str();
        let resolved = match self.inner.resolver.resolve(&orchestration.parameters.targets) {
            Ok(runtimes) => runtimes,
            Err(e) => {
                warn!(error = %e, "target resolution failed");
                self.transition(
                    id,
                    OrchestrationState::Pending,
                    OrchestrationState::Failed,
                    &format!("failed to resolve targets: {e}"),
                )?;
                return Ok(());
            }
        };
        if resolved.is_empty() {
            self.transition(
                id,
                OrchestrationState::Pending,
                OrchestrationState::Succeeded,
                "no runtimes matched the targets",
            )?;
            return Ok(());
        }

        // A previous driver may have crashed halfway through creation.
        let existing: HashSet<RuntimeId> = self
            .inner
            .store
            .list_operations(&OperationFilter::for_orchestration(id), Page::all())?
            .items
            .into_iter()
            .map(|op| op.runtime_id)
            .collect();
        let kind = operation_kind(orchestration.kind);
        let now = now_utc();
        let mut created = 0;
        for runtime in resolved.iter().filter(|r| !existing.contains(&r.runtime_id)) {
            let op = RuntimeOperation::for_runtime(new_id(), kind, id, runtime, now);
            self.inner.store.insert_operation(&op)?;
            created += 1;
        }
        info!(resolved = resolved.len(), created, "operations created");

        self.transition(
            id,
            OrchestrationState::Pending,
            OrchestrationState::InProgress,
            &format!("upgrading {} runtimes", resolved.len()),
        )?;
        Ok(())
    }

    /// Schedule every live operation once.
    async fn pass(&self, orchestration: &Orchestration, ctx: &RunContext) -> ManagerResult<Pass> {
        if ctx.cancel.is_triggered() {
            return Ok(Pass::Idle);
        }
        let filter = OperationFilter::for_orchestration(&orchestration.id).with_states(LIVE_OPERATIONS);
        let mut live = self.inner.store.list_operations(&filter, Page::all())?.items;
        if live.is_empty() {
            return Ok(Pass::Idle);
        }
        live.sort_by(|a, b| a.runtime_id.cmp(&b.runtime_id));

        let parameters = &orchestration.parameters;
        let strategy = Strategy::from_spec(&parameters.strategy, self.inner.config.default_workers);
        let jobs: Vec<Job> = live.into_iter().map(|op| self.job(parameters, op)).collect();
        debug!(jobs = jobs.len(), ?strategy, "starting scheduling pass");

        let report = self.inner.scheduler.run(jobs, strategy, ctx).await;
        debug!(?report, "scheduling pass finished");
        if ctx.cancel.is_triggered() {
            return Ok(Pass::Idle);
        }
        if report.errored > 0 || report.yielded > 0 {
            warn!(
                errored = report.errored,
                yielded = report.yielded,
                "operations left unsettled, leaving orchestration for a later resume"
            );
            return Ok(Pass::Abandoned);
        }
        if report.canary_aborted {
            return Ok(Pass::CanaryAborted);
        }
        Ok(Pass::Ran)
    }

    fn job(&self, parameters: &OrchestrationParameters, op: RuntimeOperation) -> Job {
        if parameters.strategy.schedule != ScheduleType::Maintenance {
            return Job::immediate(op.id);
        }
        let runtime = self
            .inner
            .inventory
            .get_runtime(&op.runtime_id)
            .unwrap_or_else(|e| {
                warn!(runtime = %op.runtime_id, error = %e, "runtime lookup failed, using fallback window");
                None
            });
        Job {
            window: effective_window(&parameters.strategy, runtime.as_ref(), &parameters.maintenance)
                .cloned(),
            timezone: runtime.as_ref().map(runtime_timezone).unwrap_or(Tz::UTC),
            operation_id: op.id,
        }
    }

    /// Close an in-progress orchestration whose operations are all terminal.
    fn finish(&self, id: &str) -> ManagerResult<()> {
        let stats = self
            .inner
            .store
            .operation_stats(&StatsScope::Orchestration(id.to_string()))?;
        let count = |state| stats.get(&state).copied().unwrap_or(0);
        if count(OperationState::Pending) + count(OperationState::InProgress) > 0 {
            return Ok(());
        }
        let total: u64 = stats.values().sum();
        let failed = count(OperationState::Failed);
        let (next, description) = if failed > 0 {
            (
                OrchestrationState::Failed,
                format!("{failed} of {total} operations failed"),
            )
        } else {
            (
                OrchestrationState::Succeeded,
                format!(
                    "{} operations succeeded, {} canceled",
                    count(OperationState::Succeeded),
                    count(OperationState::Canceled)
                ),
            )
        };
        self.transition(id, OrchestrationState::InProgress, next, &description)?;
        Ok(())
    }

    fn cancel_remaining(&self, id: &str) -> ManagerResult<()> {
        let filter = OperationFilter::for_orchestration(id).with_states(LIVE_OPERATIONS);
        let live = self.inner.store.list_operations(&filter, Page::all())?.items;
        for op in &live {
            cancel_operation(self.inner.store.as_ref(), &op.id, "canceled")?;
        }
        if !live.is_empty() {
            info!(count = live.len(), "canceled remaining operations");
        }
        Ok(())
    }

    /// Move `id` from `from` to `to`. `Ok(false)` when the stored state is
    /// no longer `from`.
    fn transition(
        &self,
        id: &str,
        from: OrchestrationState,
        to: OrchestrationState,
        description: &str,
    ) -> ManagerResult<bool> {
        let updated = modify_orchestration(self.inner.store.as_ref(), id, |o| {
            if o.state != from || !from.can_transition_to(to) {
                return false;
            }
            o.state = to;
            o.description = description.to_string();
            true
        })?;
        match updated {
            Some(_) => {
                info!(orchestration = %id, %from, %to, "orchestration state changed");
                Ok(true)
            }
            None => {
                debug!(orchestration = %id, %from, %to, "transition skipped, state moved on");
                Ok(false)
            }
        }
    }
}

fn retryable(state: OrchestrationState) -> bool {
    matches!(state, OrchestrationState::Failed | OrchestrationState::InProgress)
}

fn operation_kind(kind: OrchestrationType) -> OperationKind {
    match kind {
        OrchestrationType::UpgradeKyma => OperationKind::UpgradeKyma,
    }
}
