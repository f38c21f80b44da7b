//! Scheduler — feeds an orchestration's operations to executor workers
//! according to a [`Strategy`].
//!
//! Every job handed to [`Scheduler::run`] ends terminal unless the
//! executor hit an internal error: jobs never enqueued because of
//! cancellation or a failed canary batch are cancelled here.

use std::sync::Arc;

use chrono_tz::Tz;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use upgrader_core::now_utc;
use upgrader_executor::{Executor, RunContext, RunOutcome, cancel_operation};
use upgrader_state::{MaintenanceWindow, OperationId};

use crate::queue::OperationQueue;
use crate::strategy::{Strategy, canary_batch_size};
use crate::window::next_open;

/// `description` of operations whose window never opened in time.
pub const WINDOW_MISSED: &str = "WindowMissed";

/// One operation to schedule.
#[derive(Debug, Clone)]
pub struct Job {
    pub operation_id: OperationId,
    /// Wait for this window before starting. `None` starts immediately.
    pub window: Option<MaintenanceWindow>,
    pub timezone: Tz,
}

impl Job {
    pub fn immediate(operation_id: impl Into<OperationId>) -> Self {
        Self {
            operation_id: operation_id.into(),
            window: None,
            timezone: Tz::UTC,
        }
    }
}

/// Outcome counts of one scheduling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    pub yielded: usize,
    /// Operations left in progress by an executor error.
    pub errored: usize,
    pub canary_aborted: bool,
}

impl ScheduleReport {
    fn record(&mut self, outcome: Result<RunOutcome, ()>) {
        match outcome {
            Ok(RunOutcome::Succeeded) => self.succeeded += 1,
            Ok(RunOutcome::Failed) => self.failed += 1,
            Ok(RunOutcome::Canceled) => self.canceled += 1,
            Ok(RunOutcome::Yielded) => self.yielded += 1,
            Err(()) => self.errored += 1,
        }
    }

    fn merge(&mut self, other: ScheduleReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.canceled += other.canceled;
        self.yielded += other.yielded;
        self.errored += other.errored;
        self.canary_aborted |= other.canary_aborted;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.canceled + self.yielded + self.errored
    }
}

#[derive(Clone)]
pub struct Scheduler {
    executor: Arc<Executor>,
}

impl Scheduler {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    /// Run `jobs` in order under `strategy` and wait until all of them are
    /// settled.
    pub async fn run(&self, jobs: Vec<Job>, strategy: Strategy, ctx: &RunContext) -> ScheduleReport {
        match strategy {
            Strategy::Parallel { workers } => self.run_parallel(jobs, workers, ctx).await,
            Strategy::Canary { percent, workers } => {
                let batch = canary_batch_size(percent, jobs.len());
                let mut jobs = jobs;
                let rest = jobs.split_off(batch);
                info!(batch = jobs.len(), remainder = rest.len(), "starting canary batch");

                let mut report = self.run_parallel(jobs, workers.min(batch), ctx).await;
                if report.succeeded == batch {
                    report.merge(self.run_parallel(rest, workers, ctx).await);
                } else {
                    warn!(
                        failed = report.failed,
                        canceled = report.canceled,
                        "canary batch did not fully succeed, canceling remainder"
                    );
                    report.canary_aborted = true;
                    report.merge(self.sweep(rest, "canceled: canary batch failed"));
                }
                report
            }
        }
    }

    async fn run_parallel(&self, jobs: Vec<Job>, workers: usize, ctx: &RunContext) -> ScheduleReport {
        if jobs.is_empty() {
            return ScheduleReport::default();
        }
        let workers = workers.clamp(1, jobs.len());
        let queue = Arc::new(OperationQueue::<Job>::new(2 * workers));

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let scheduler = self.clone();
            let ctx = ctx.clone();
            set.spawn(async move {
                let mut report = ScheduleReport::default();
                while let Some(job) = queue.get().await {
                    debug!(worker, operation = %job.operation_id, "dequeued");
                    report.record(scheduler.run_job(job, &ctx).await);
                }
                report
            });
        }

        let mut pending = jobs.into_iter();
        let mut unsent = Vec::new();
        while let Some(job) = pending.next() {
            let sent = if ctx.cancel.is_triggered() {
                false
            } else {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.triggered() => false,
                    result = queue.add(job.clone()) => result.is_ok(),
                }
            };
            if !sent {
                unsent.push(job);
                unsent.extend(pending);
                break;
            }
        }
        queue.close();

        let mut report = self.sweep(unsent, "canceled");
        report.merge(join_workers(&mut set).await);
        report
    }

    /// Wait for the job's window, then execute it.
    async fn run_job(&self, job: Job, ctx: &RunContext) -> Result<RunOutcome, ()> {
        let id = job.operation_id.as_str();
        if let Some(window) = &job.window {
            let now = now_utc();
            let opens = next_open(window, job.timezone, now);
            if opens > now {
                let wait = (opens - now).to_std().unwrap_or_default();
                if ctx
                    .deadline
                    .is_some_and(|d| Instant::now().checked_add(wait).is_none_or(|at| at > d))
                {
                    info!(operation = %id, %opens, "maintenance window opens after the deadline");
                    return self.cancel(id, WINDOW_MISSED);
                }
                debug!(operation = %id, %opens, "waiting for maintenance window");
                tokio::select! {
                    biased;
                    _ = ctx.cancel.triggered() => return self.cancel(id, "canceled"),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
        self.executor.run(id, ctx).await.map_err(|_| ())
    }

    fn cancel(&self, id: &str, reason: &str) -> Result<RunOutcome, ()> {
        cancel_operation(self.executor.store().as_ref(), id, reason).map_err(|e| {
            error!(operation = %id, error = %e, "failed to cancel operation");
        })
    }

    /// Cancel jobs that will never be handed to a worker.
    fn sweep(&self, jobs: Vec<Job>, reason: &str) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        for job in jobs {
            report.record(self.cancel(&job.operation_id, reason));
        }
        report
    }
}

async fn join_workers(set: &mut JoinSet<ScheduleReport>) -> ScheduleReport {
    let mut report = ScheduleReport::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(worker) => report.merge(worker),
            Err(e) => error!(error = %e, "scheduler worker panicked"),
        }
    }
    report
}
