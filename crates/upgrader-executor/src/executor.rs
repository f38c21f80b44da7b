//! Executor — drives one operation through its step chain.
//!
//! The persisted operation is the only state carried between steps: the
//! executor writes the cursor, attempt count and step start time through
//! the store's CAS update after every transition, so a crashed worker can
//! be replaced by re-running [`Executor::run`] on the same id.
//!
//! A CAS conflict means somebody else wrote the operation since we read it.
//! The executor then treats the operation as externally owned and returns
//! [`RunOutcome::Yielded`] without touching it further. The only exception
//! is cancellation, which is applied on top of whatever is stored.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use upgrader_core::{ExecutorConfig, now_utc};
use upgrader_state::{
    OperationKind, OperationState, RuntimeOperation, StateError, Store, modify_operation,
};

use crate::backoff::Backoff;
use crate::cancel::CancelSignal;
use crate::error::{ExecutorError, ExecutorResult};
use crate::registry::{OperationCapability, StepRegistry};
use crate::step::{ErrorClass, StepContext, StepOutput};

/// Prefix of `errorMessage` for deadline failures.
pub const TIMEOUT_PREFIX: &str = "timeout:";

/// Inputs shared by every operation of one orchestration run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub cancel: CancelSignal,
    /// Orchestration deadline. Operations still running when it passes fail
    /// with a timeout.
    pub deadline: Option<Instant>,
    pub dry_run: bool,
}

/// How a call to [`Executor::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Canceled,
    /// Another writer owns the operation now.
    Yielded,
}

impl RunOutcome {
    fn of(state: OperationState) -> Option<Self> {
        match state {
            OperationState::Succeeded => Some(Self::Succeeded),
            OperationState::Failed => Some(Self::Failed),
            OperationState::Canceled => Some(Self::Canceled),
            OperationState::Pending | OperationState::InProgress => None,
        }
    }
}

/// Why a sleep ended early.
enum Wake {
    Elapsed,
    Canceled,
    Deadline,
}

pub struct Executor {
    store: Arc<dyn Store>,
    registry: Arc<StepRegistry>,
    backoff: Backoff,
    step_timeout: Duration,
}

impl Executor {
    pub fn new(store: Arc<dyn Store>, registry: Arc<StepRegistry>, config: &ExecutorConfig) -> Self {
        Self {
            store,
            registry,
            backoff: Backoff::from_config(config),
            step_timeout: config.step_timeout(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Cursor a fresh operation of `kind` starts from.
    pub fn first_step(&self, kind: OperationKind) -> Option<String> {
        self.registry
            .get(kind)
            .and_then(|capability| capability.first_step())
            .map(str::to_string)
    }

    /// Run operation `id` until it is terminal, cancelled, or taken over.
    pub async fn run(&self, id: &str, ctx: &RunContext) -> ExecutorResult<RunOutcome> {
        let op = self.store.get_operation(id)?;
        let span = info_span!(
            "operation",
            operation = %op.id,
            runtime = %op.runtime_id,
            kind = %op.kind,
        );
        let result = self.run_loaded(op, ctx).instrument(span.clone()).await;
        if let Err(e) = &result {
            span.in_scope(|| error!(error = %e, "operation left in progress"));
        }
        result
    }

    async fn run_loaded(&self, mut op: RuntimeOperation, ctx: &RunContext) -> ExecutorResult<RunOutcome> {
        if let Some(outcome) = RunOutcome::of(op.state) {
            return Ok(outcome);
        }
        let capability = self
            .registry
            .get(op.kind)
            .ok_or(ExecutorError::UnknownKind(op.kind))?;

        if ctx.cancel.is_triggered() {
            return self.cancel(&op.id, "canceled before start");
        }

        if op.state == OperationState::Pending {
            op.state = OperationState::InProgress;
            if op.step_cursor.is_none() {
                op.step_cursor = capability.first_step().map(str::to_string);
            }
            op.attempt = 0;
            op.step_started_at = None;
            op.description = "operation in progress".to_string();
            op = match self.persist(&op)? {
                Some(stored) => stored,
                None => return Ok(RunOutcome::Yielded),
            };
            info!("operation started");
        }

        let mut step_deadline = self.step_deadline(capability, &op);
        let mut last_error: Option<String> = None;

        loop {
            let Some(cursor) = op.step_cursor.clone() else {
                return self.succeed(op);
            };
            let step = capability
                .step(&cursor)
                .ok_or_else(|| ExecutorError::UnknownStep {
                    kind: op.kind,
                    step: cursor.clone(),
                })?
                .clone();

            if ctx.cancel.is_triggered() {
                return self.cancel(&op.id, "canceled");
            }
            if passed(ctx.deadline) {
                return self.fail(op, format!("{TIMEOUT_PREFIX} orchestration deadline exceeded"));
            }
            if passed(step_deadline) {
                return self.fail(op, step_timeout_message(&cursor, last_error.as_deref()));
            }

            op.attempt += 1;
            if op.step_started_at.is_none() {
                op.step_started_at = Some(now_utc());
            }
            let step_ctx = StepContext {
                orchestration_id: op.orchestration_id.clone(),
                dry_run: ctx.dry_run,
                attempt: op.attempt,
            };
            debug!(step = %cursor, attempt = op.attempt, "running step");

            let bound = match (step_deadline, ctx.deadline) {
                (Some(step), Some(overall)) => Some(step.min(overall)),
                (step, overall) => step.or(overall),
            };
            let result = tokio::select! {
                biased;
                _ = ctx.cancel.triggered() => {
                    return self.cancel(&op.id, "canceled");
                }
                _ = sleep_until(bound) => None,
                result = step.run(op.clone(), &step_ctx) => Some(result),
            };

            let Some(result) = result else {
                // The invocation itself outlived a deadline; the checks at
                // the top of the loop turn that into a failure.
                continue;
            };

            match result {
                Ok(StepOutput {
                    operation,
                    retry_after,
                }) => {
                    let next = absorb(&op, operation);
                    if retry_after.is_zero() {
                        op = next;
                        op.step_cursor = capability.next_step(&cursor).map(str::to_string);
                        if op.step_cursor.is_none() {
                            return self.succeed(op);
                        }
                        op.attempt = 0;
                        op.step_started_at = None;
                        op = match self.persist(&op)? {
                            Some(stored) => stored,
                            None => return Ok(RunOutcome::Yielded),
                        };
                        step_deadline = self.step_deadline(capability, &op);
                        last_error = None;
                        debug!(step = %cursor, "step completed");
                    } else {
                        op = match self.persist(&next)? {
                            Some(stored) => stored,
                            None => return Ok(RunOutcome::Yielded),
                        };
                        debug!(step = %cursor, ?retry_after, "step asked to be re-run");
                        match self.sleep(retry_after, ctx).await {
                            Wake::Canceled => return self.cancel(&op.id, "canceled"),
                            Wake::Elapsed | Wake::Deadline => {}
                        }
                    }
                }
                Err(err) => match (capability.classify)(&err) {
                    ErrorClass::Permanent => {
                        warn!(step = %cursor, error = %err, "step failed permanently");
                        return self.fail(op, format!("step {cursor}: {err}"));
                    }
                    ErrorClass::Transient => {
                        last_error = Some(err.to_string());
                        if passed(step_deadline) {
                            warn!(step = %cursor, error = %err, "step out of retry budget");
                            return self.fail(op, step_timeout_message(&cursor, last_error.as_deref()));
                        }
                        let delay = self.backoff.delay(op.attempt);
                        op.description = format!("retrying step {cursor}: {err}");
                        op = match self.persist(&op)? {
                            Some(stored) => stored,
                            None => return Ok(RunOutcome::Yielded),
                        };
                        info!(step = %cursor, attempt = op.attempt, ?delay, error = %err, "transient step failure, backing off");
                        match self.sleep(delay, ctx).await {
                            Wake::Canceled => return self.cancel(&op.id, "canceled"),
                            Wake::Elapsed | Wake::Deadline => {}
                        }
                    }
                },
            }
        }
    }

    /// When the step under the cursor runs out of time. Counts from the
    /// persisted first invocation, so a resumed step keeps its budget.
    /// `None` when the budget lies beyond what an `Instant` can hold.
    fn step_deadline(&self, capability: &OperationCapability, op: &RuntimeOperation) -> Option<Instant> {
        let budget = op
            .step_cursor
            .as_deref()
            .and_then(|name| capability.step(name))
            .and_then(|step| step.timeout())
            .unwrap_or(self.step_timeout);
        let spent = op
            .step_started_at
            .and_then(|started| (now_utc() - started).to_std().ok())
            .unwrap_or_default();
        Instant::now().checked_add(budget.saturating_sub(spent))
    }

    async fn sleep(&self, duration: Duration, ctx: &RunContext) -> Wake {
        let deadline = ctx.deadline;
        tokio::select! {
            biased;
            _ = ctx.cancel.triggered() => Wake::Canceled,
            _ = sleep_until(deadline) => Wake::Deadline,
            _ = tokio::time::sleep(duration) => Wake::Elapsed,
        }
    }

    /// CAS-write `op`. `Ok(None)` means another writer got there first.
    fn persist(&self, op: &RuntimeOperation) -> ExecutorResult<Option<RuntimeOperation>> {
        let mut next = op.clone();
        next.updated_at = now_utc().max(op.updated_at);
        match self.store.update_operation(&next) {
            Ok(stored) => Ok(Some(stored)),
            Err(StateError::Conflict(msg)) => {
                info!(%msg, "operation changed underneath, yielding");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn succeed(&self, mut op: RuntimeOperation) -> ExecutorResult<RunOutcome> {
        op.state = OperationState::Succeeded;
        op.step_cursor = None;
        op.error_message = None;
        op.description = "operation succeeded".to_string();
        match self.persist(&op)? {
            Some(_) => {
                info!("operation succeeded");
                Ok(RunOutcome::Succeeded)
            }
            None => Ok(RunOutcome::Yielded),
        }
    }

    fn fail(&self, mut op: RuntimeOperation, message: String) -> ExecutorResult<RunOutcome> {
        op.state = OperationState::Failed;
        op.description = "operation failed".to_string();
        op.error_message = Some(message);
        match self.persist(&op)? {
            Some(stored) => {
                warn!(error = stored.error_message.as_deref().unwrap_or_default(), "operation failed");
                Ok(RunOutcome::Failed)
            }
            None => Ok(RunOutcome::Yielded),
        }
    }

    /// Move the stored operation to `canceled` unless it is already
    /// terminal, in which case its actual outcome is reported.
    fn cancel(&self, id: &str, reason: &str) -> ExecutorResult<RunOutcome> {
        cancel_operation(self.store.as_ref(), id, reason)
    }
}

/// Cancel operation `id` on top of whatever is stored. Terminal operations
/// are left alone and their state is reported instead.
pub fn cancel_operation(store: &dyn Store, id: &str, reason: &str) -> ExecutorResult<RunOutcome> {
    let updated = modify_operation(store, id, |op| {
        if op.is_terminal() {
            return false;
        }
        op.state = OperationState::Canceled;
        op.description = reason.to_string();
        true
    })?;
    match updated {
        Some(_) => {
            info!(operation = %id, %reason, "operation canceled");
            Ok(RunOutcome::Canceled)
        }
        None => {
            let state = store.get_operation(id)?.state;
            Ok(RunOutcome::of(state).unwrap_or(RunOutcome::Canceled))
        }
    }
}

fn passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Sleep until `deadline`, or forever without one.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

fn step_timeout_message(step: &str, last_error: Option<&str>) -> String {
    match last_error {
        Some(err) => format!("{TIMEOUT_PREFIX} step {step} exceeded its deadline: {err}"),
        None => format!("{TIMEOUT_PREFIX} step {step} exceeded its deadline"),
    }
}

/// Accept a step's output but keep the executor's bookkeeping fields.
fn absorb(current: &RuntimeOperation, mut next: RuntimeOperation) -> RuntimeOperation {
    next.id = current.id.clone();
    next.kind = current.kind;
    next.orchestration_id = current.orchestration_id.clone();
    next.runtime_id = current.runtime_id.clone();
    next.instance_id = current.instance_id.clone();
    next.global_account_id = current.global_account_id.clone();
    next.sub_account_id = current.sub_account_id.clone();
    next.region = current.region.clone();
    next.state = current.state;
    next.created_at = current.created_at;
    next.updated_at = current.updated_at;
    next.version = current.version;
    next.step_cursor = current.step_cursor.clone();
    next.attempt = current.attempt;
    next.step_started_at = current.step_started_at;
    next
}
