//! In-memory `Store` driver.
//!
//! Same semantics as the redb driver. All mutations happen under one
//! exclusive lock, and every read hands out an owned clone so callers can
//! never alias stored state.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::*;
use crate::types::*;

#[derive(Default)]
struct Inner {
    orchestrations: HashMap<OrchestrationId, Orchestration>,
    operations: HashMap<OperationId, RuntimeOperation>,
    /// `{orchestration_id}:{runtime_id}` → id of the live operation.
    active: HashMap<String, OperationId>,
    runtimes: BTreeMap<RuntimeId, Runtime>,
}

/// Mutex-guarded maps, for tests and single-process setups.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert_orchestration(&self, orchestration: &Orchestration) -> StateResult<()> {
        let mut inner = self.inner.lock();
        if inner.orchestrations.contains_key(&orchestration.id) {
            return Err(StateError::AlreadyExists(format!(
                "orchestration {}",
                orchestration.id
            )));
        }
        inner
            .orchestrations
            .insert(orchestration.id.clone(), orchestration.clone());
        debug!(orchestration = %orchestration.id, "orchestration inserted");
        Ok(())
    }

    fn get_orchestration(&self, id: &str) -> StateResult<Orchestration> {
        self.inner
            .lock()
            .orchestrations
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(format!("orchestration {id}")))
    }

    fn update_orchestration(&self, orchestration: &Orchestration) -> StateResult<Orchestration> {
        let mut inner = self.inner.lock();
        let stored = inner
            .orchestrations
            .get_mut(&orchestration.id)
            .ok_or_else(|| StateError::NotFound(format!("orchestration {}", orchestration.id)))?;
        if stored.version != orchestration.version {
            return Err(orchestration_conflict(stored, orchestration));
        }
        let mut next = orchestration.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    fn list_orchestrations(
        &self,
        filter: &OrchestrationFilter,
        page: Page,
    ) -> StateResult<PageResult<Orchestration>> {
        let matching: Vec<Orchestration> = self
            .inner
            .lock()
            .orchestrations
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        Ok(paginate(matching, page))
    }

    fn insert_operation(&self, operation: &RuntimeOperation) -> StateResult<()> {
        let mut inner = self.inner.lock();
        if inner.operations.contains_key(&operation.id) {
            return Err(StateError::AlreadyExists(format!("operation {}", operation.id)));
        }
        if let Some(key) = operation.active_key() {
            if let Some(holder) = inner.active.get(&key) {
                return Err(StateError::AlreadyExists(duplicate_live_operation(&key, holder)));
            }
            inner.active.insert(key, operation.id.clone());
        }
        inner
            .operations
            .insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    fn get_operation(&self, id: &str) -> StateResult<RuntimeOperation> {
        self.inner
            .lock()
            .operations
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(format!("operation {id}")))
    }

    fn get_operations(&self, ids: &[String]) -> StateResult<Vec<RuntimeOperation>> {
        let inner = self.inner.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.operations.get(id).cloned())
            .collect())
    }

    fn update_operation(&self, operation: &RuntimeOperation) -> StateResult<RuntimeOperation> {
        let mut inner = self.inner.lock();
        let stored = inner
            .operations
            .get(&operation.id)
            .ok_or_else(|| StateError::NotFound(format!("operation {}", operation.id)))?;
        if stored.version != operation.version {
            return Err(operation_conflict(stored, operation));
        }
        let old_key = stored.active_key();
        let new_key = operation.active_key();
        if let Some(key) = &new_key {
            if let Some(holder) = inner.active.get(key) {
                if *holder != operation.id {
                    return Err(StateError::Conflict(duplicate_live_operation(key, holder)));
                }
            }
        }
        if let Some(key) = old_key {
            inner.active.remove(&key);
        }
        if let Some(key) = new_key {
            inner.active.insert(key, operation.id.clone());
        }
        let mut next = operation.clone();
        next.version += 1;
        inner.operations.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    fn list_operations(
        &self,
        filter: &OperationFilter,
        page: Page,
    ) -> StateResult<PageResult<RuntimeOperation>> {
        let matching: Vec<RuntimeOperation> = self
            .inner
            .lock()
            .operations
            .values()
            .filter(|op| filter.matches(op))
            .cloned()
            .collect();
        Ok(paginate(matching, page))
    }

    fn list_operations_for_runtime(&self, runtime_id: &str) -> StateResult<Vec<RuntimeOperation>> {
        let mut history: Vec<RuntimeOperation> = self
            .inner
            .lock()
            .operations
            .values()
            .filter(|op| op.runtime_id == runtime_id)
            .cloned()
            .collect();
        sort_listed(&mut history);
        Ok(history)
    }

    fn operation_stats(&self, scope: &StatsScope) -> StateResult<OperationStats> {
        let inner = self.inner.lock();
        Ok(tally(inner.operations.values().filter(|op| in_scope(scope, op))))
    }

    fn operation_stats_by_kind(&self) -> StateResult<BTreeMap<OperationKind, OperationStats>> {
        Ok(tally_by_kind(self.inner.lock().operations.values()))
    }

    fn put_runtime(&self, runtime: &Runtime) -> StateResult<()> {
        self.inner
            .lock()
            .runtimes
            .insert(runtime.runtime_id.clone(), runtime.clone());
        Ok(())
    }

    fn get_runtime(&self, runtime_id: &str) -> StateResult<Runtime> {
        self.inner
            .lock()
            .runtimes
            .get(runtime_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(format!("runtime {runtime_id}")))
    }

    fn list_runtimes(&self) -> StateResult<Vec<Runtime>> {
        Ok(self.inner.lock().runtimes.values().cloned().collect())
    }
}
