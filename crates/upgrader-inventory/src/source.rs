//! Where runtime records come from.

use std::sync::Arc;

use upgrader_state::{Runtime, Store};

/// Read access to the runtime inventory.
///
/// A single `list_runtimes` call must return a consistent snapshot.
pub trait InventorySource: Send + Sync {
    fn list_runtimes(&self) -> anyhow::Result<Vec<Runtime>>;

    /// Look up a single runtime. `Ok(None)` when it is not in the inventory.
    fn get_runtime(&self, runtime_id: &str) -> anyhow::Result<Option<Runtime>> {
        Ok(self
            .list_runtimes()?
            .into_iter()
            .find(|r| r.runtime_id == runtime_id))
    }
}

/// Fixed inventory, for tests and one-off tooling.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    runtimes: Vec<Runtime>,
}

impl StaticInventory {
    pub fn new(runtimes: Vec<Runtime>) -> Self {
        Self { runtimes }
    }
}

impl InventorySource for StaticInventory {
    fn list_runtimes(&self) -> anyhow::Result<Vec<Runtime>> {
        Ok(self.runtimes.clone())
    }
}

/// Inventory backed by the store's runtime snapshot collection.
#[derive(Clone)]
pub struct StoreInventory {
    store: Arc<dyn Store>,
}

impl StoreInventory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl InventorySource for StoreInventory {
    fn list_runtimes(&self) -> anyhow::Result<Vec<Runtime>> {
        Ok(self.store.list_runtimes()?)
    }

    fn get_runtime(&self, runtime_id: &str) -> anyhow::Result<Option<Runtime>> {
        match self.store.get_runtime(runtime_id) {
            Ok(runtime) => Ok(Some(runtime)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
