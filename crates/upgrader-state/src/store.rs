//! The `Store` contract shared by the redb and in-memory drivers.
//!
//! Every write of an existing entity is a compare-and-swap on its
//! `version`: the caller passes the full new value carrying the version it
//! last read, and the driver either stores it as `version + 1` or fails
//! with [`StateError::Conflict`] without touching the stored row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Durable, optimistic-concurrency repository for orchestrations,
/// operations, and the runtime inventory snapshot.
pub trait Store: Send + Sync {
    // ── Orchestrations ─────────────────────────────────────────────

    /// Insert a new orchestration. Fails with `AlreadyExists` on id collision.
    fn insert_orchestration(&self, orchestration: &Orchestration) -> StateResult<()>;

    fn get_orchestration(&self, id: &str) -> StateResult<Orchestration>;

    /// CAS update keyed on `orchestration.version`. Returns the stored value.
    fn update_orchestration(&self, orchestration: &Orchestration) -> StateResult<Orchestration>;

    fn list_orchestrations(
        &self,
        filter: &OrchestrationFilter,
        page: Page,
    ) -> StateResult<PageResult<Orchestration>>;

    // ── Operations ─────────────────────────────────────────────────

    /// Insert a new operation of any kind. Ids are unique across kinds, and
    /// a live operation may not share its (orchestration, runtime) pair with
    /// another live operation.
    fn insert_operation(&self, operation: &RuntimeOperation) -> StateResult<()>;

    fn get_operation(&self, id: &str) -> StateResult<RuntimeOperation>;

    /// Fetch the subset of `ids` that exist, in the order given.
    fn get_operations(&self, ids: &[String]) -> StateResult<Vec<RuntimeOperation>>;

    /// CAS update keyed on `operation.version`. Returns the stored value.
    fn update_operation(&self, operation: &RuntimeOperation) -> StateResult<RuntimeOperation>;

    fn list_operations(
        &self,
        filter: &OperationFilter,
        page: Page,
    ) -> StateResult<PageResult<RuntimeOperation>>;

    /// Operation history of one runtime, oldest first.
    fn list_operations_for_runtime(&self, runtime_id: &str) -> StateResult<Vec<RuntimeOperation>>;

    fn operation_stats(&self, scope: &StatsScope) -> StateResult<OperationStats>;

    fn operation_stats_by_kind(&self) -> StateResult<BTreeMap<OperationKind, OperationStats>>;

    // ── Runtime inventory ──────────────────────────────────────────

    /// Insert or replace a runtime snapshot.
    fn put_runtime(&self, runtime: &Runtime) -> StateResult<()>;

    fn get_runtime(&self, runtime_id: &str) -> StateResult<Runtime>;

    /// All runtimes ordered by runtime id.
    fn list_runtimes(&self) -> StateResult<Vec<Runtime>>;
}

/// Entities with a stable listing order.
pub(crate) trait Listed {
    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Listed for Orchestration {
    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Listed for RuntimeOperation {
    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Sort by `created_at` ascending (ties by id) and cut out one page.
pub(crate) fn paginate<T: Listed>(mut items: Vec<T>, page: Page) -> PageResult<T> {
    sort_listed(&mut items);
    let total_count = items.len();
    let items: Vec<T> = items
        .into_iter()
        .skip(page.offset())
        .take(page.page_size as usize)
        .collect();
    PageResult {
        count: items.len(),
        items,
        total_count,
    }
}

pub(crate) fn sort_listed<T: Listed>(items: &mut [T]) {
    items.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}

pub(crate) fn tally<'a>(ops: impl Iterator<Item = &'a RuntimeOperation>) -> OperationStats {
    let mut stats = OperationStats::new();
    for op in ops {
        *stats.entry(op.state).or_insert(0) += 1;
    }
    stats
}

pub(crate) fn tally_by_kind<'a>(
    ops: impl Iterator<Item = &'a RuntimeOperation>,
) -> BTreeMap<OperationKind, OperationStats> {
    let mut stats: BTreeMap<OperationKind, OperationStats> = BTreeMap::new();
    for op in ops {
        *stats.entry(op.kind).or_default().entry(op.state).or_insert(0) += 1;
    }
    stats
}

pub(crate) fn in_scope(scope: &StatsScope, op: &RuntimeOperation) -> bool {
    match scope {
        StatsScope::Global => true,
        StatsScope::Orchestration(id) => op.orchestration_id.as_deref() == Some(id.as_str()),
    }
}

pub(crate) fn orchestration_conflict(stored: &Orchestration, attempted: &Orchestration) -> StateError {
    StateError::Conflict(format!(
        "orchestration {} is at version {}, update was based on version {}",
        stored.id, stored.version, attempted.version
    ))
}

pub(crate) fn operation_conflict(stored: &RuntimeOperation, attempted: &RuntimeOperation) -> StateError {
    StateError::Conflict(format!(
        "operation {} (runtime {}) is at version {}, update was based on version {}",
        stored.id, stored.runtime_id, stored.version, attempted.version
    ))
}

pub(crate) fn duplicate_live_operation(key: &str, holder: &str) -> String {
    format!("runtime already has live operation {holder} under {key}")
}
