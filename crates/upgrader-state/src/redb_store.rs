//! RedbStore — durable `Store` driver.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. Every
//! compare-and-swap runs inside a single write transaction: the stored
//! version check, the live-operation index maintenance and the row write
//! either all commit or none do.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::*;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral redb store on the in-memory backend.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ORCHESTRATIONS).map_err(map_err!(Table))?;
        txn.open_table(OPERATIONS).map_err(map_err!(Table))?;
        txn.open_table(ACTIVE_OPERATIONS).map_err(map_err!(Table))?;
        txn.open_table(RUNTIMES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, table: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn scan_operations(&self) -> StateResult<Vec<RuntimeOperation>> {
        self.scan_json(OPERATIONS)
    }
}

impl Store for RedbStore {
    // ── Orchestrations ─────────────────────────────────────────────

    fn insert_orchestration(&self, orchestration: &Orchestration) -> StateResult<()> {
        let value = encode(orchestration)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ORCHESTRATIONS).map_err(map_err!(Table))?;
            let exists = table
                .get(orchestration.id.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if exists {
                return Err(StateError::AlreadyExists(format!(
                    "orchestration {}",
                    orchestration.id
                )));
            }
            table
                .insert(orchestration.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(orchestration = %orchestration.id, "orchestration stored");
        Ok(())
    }

    fn get_orchestration(&self, id: &str) -> StateResult<Orchestration> {
        self.get_json(ORCHESTRATIONS, id)?
            .ok_or_else(|| StateError::NotFound(format!("orchestration {id}")))
    }

    fn update_orchestration(&self, orchestration: &Orchestration) -> StateResult<Orchestration> {
        let mut next = orchestration.clone();
        next.version += 1;
        let value = encode(&next)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ORCHESTRATIONS).map_err(map_err!(Table))?;
            let stored: Orchestration = match table
                .get(orchestration.id.as_str())
                .map_err(map_err!(Read))?
            {
                Some(guard) => decode(guard.value())?,
                None => {
                    return Err(StateError::NotFound(format!(
                        "orchestration {}",
                        orchestration.id
                    )));
                }
            };
            if stored.version != orchestration.version {
                return Err(orchestration_conflict(&stored, orchestration));
            }
            table
                .insert(orchestration.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    fn list_orchestrations(
        &self,
        filter: &OrchestrationFilter,
        page: Page,
    ) -> StateResult<PageResult<Orchestration>> {
        let matching: Vec<Orchestration> = self
            .scan_json::<Orchestration>(ORCHESTRATIONS)?
            .into_iter()
            .filter(|o| filter.matches(o))
            .collect();
        Ok(paginate(matching, page))
    }

    // ── Operations ─────────────────────────────────────────────────

    fn insert_operation(&self, operation: &RuntimeOperation) -> StateResult<()> {
        let value = encode(operation)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut ops = txn.open_table(OPERATIONS).map_err(map_err!(Table))?;
            let mut active = txn.open_table(ACTIVE_OPERATIONS).map_err(map_err!(Table))?;

            let exists = ops
                .get(operation.id.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if exists {
                return Err(StateError::AlreadyExists(format!(
                    "operation {}",
                    operation.id
                )));
            }
            if let Some(key) = operation.active_key() {
                let holder = active
                    .get(key.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_string());
                if let Some(holder) = holder {
                    return Err(StateError::AlreadyExists(duplicate_live_operation(
                        &key, &holder,
                    )));
                }
                active
                    .insert(key.as_str(), operation.id.as_str())
                    .map_err(map_err!(Write))?;
            }
            ops.insert(operation.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(operation = %operation.id, runtime = %operation.runtime_id, kind = %operation.kind, "operation stored");
        Ok(())
    }

    fn get_operation(&self, id: &str) -> StateResult<RuntimeOperation> {
        self.get_json(OPERATIONS, id)?
            .ok_or_else(|| StateError::NotFound(format!("operation {id}")))
    }

    fn get_operations(&self, ids: &[String]) -> StateResult<Vec<RuntimeOperation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OPERATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = table.get(id.as_str()).map_err(map_err!(Read))? {
                results.push(decode(guard.value())?);
            }
        }
        Ok(results)
    }

    fn update_operation(&self, operation: &RuntimeOperation) -> StateResult<RuntimeOperation> {
        let mut next = operation.clone();
        next.version += 1;
        let value = encode(&next)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut ops = txn.open_table(OPERATIONS).map_err(map_err!(Table))?;
            let mut active = txn.open_table(ACTIVE_OPERATIONS).map_err(map_err!(Table))?;

            let stored: RuntimeOperation =
                match ops.get(operation.id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => decode(guard.value())?,
                    None => {
                        return Err(StateError::NotFound(format!(
                            "operation {}",
                            operation.id
                        )));
                    }
                };
            if stored.version != operation.version {
                return Err(operation_conflict(&stored, operation));
            }

            let new_key = operation.active_key();
            if let Some(key) = &new_key {
                let holder = active
                    .get(key.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_string());
                if let Some(holder) = holder.filter(|h| *h != operation.id) {
                    return Err(StateError::Conflict(duplicate_live_operation(key, &holder)));
                }
            }
            if let Some(key) = stored.active_key() {
                active.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            if let Some(key) = &new_key {
                active
                    .insert(key.as_str(), operation.id.as_str())
                    .map_err(map_err!(Write))?;
            }
            ops.insert(operation.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    fn list_operations(
        &self,
        filter: &OperationFilter,
        page: Page,
    ) -> StateResult<PageResult<RuntimeOperation>> {
        let matching: Vec<RuntimeOperation> = self
            .scan_operations()?
            .into_iter()
            .filter(|op| filter.matches(op))
            .collect();
        Ok(paginate(matching, page))
    }

    fn list_operations_for_runtime(&self, runtime_id: &str) -> StateResult<Vec<RuntimeOperation>> {
        let mut history: Vec<RuntimeOperation> = self
            .scan_operations()?
            .into_iter()
            .filter(|op| op.runtime_id == runtime_id)
            .collect();
        sort_listed(&mut history);
        Ok(history)
    }

    fn operation_stats(&self, scope: &StatsScope) -> StateResult<OperationStats> {
        let ops = self.scan_operations()?;
        Ok(tally(ops.iter().filter(|op| in_scope(scope, op))))
    }

    fn operation_stats_by_kind(&self) -> StateResult<BTreeMap<OperationKind, OperationStats>> {
        let ops = self.scan_operations()?;
        Ok(tally_by_kind(ops.iter()))
    }

    // ── Runtime inventory ──────────────────────────────────────────

    fn put_runtime(&self, runtime: &Runtime) -> StateResult<()> {
        let value = encode(runtime)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RUNTIMES).map_err(map_err!(Table))?;
            table
                .insert(runtime.runtime_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(runtime = %runtime.runtime_id, "runtime stored");
        Ok(())
    }

    fn get_runtime(&self, runtime_id: &str) -> StateResult<Runtime> {
        self.get_json(RUNTIMES, runtime_id)?
            .ok_or_else(|| StateError::NotFound(format!("runtime {runtime_id}")))
    }

    fn list_runtimes(&self) -> StateResult<Vec<Runtime>> {
        // redb iterates keys in order, so this is already sorted by runtime id.
        self.scan_json(RUNTIMES)
    }
}
