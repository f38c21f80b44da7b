//! Resolver — turns a `TargetSpec` into the ordered list of runtimes to
//! operate on.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use upgrader_state::{Runtime, TargetSelector, TargetSpec};

use crate::error::{ResolveError, ResolveResult};
use crate::selector::CompiledSelector;
use crate::source::InventorySource;

pub struct Resolver {
    source: Arc<dyn InventorySource>,
}

impl Resolver {
    pub fn new(source: Arc<dyn InventorySource>) -> Self {
        Self { source }
    }

    /// Validate and compile every selector of `spec` without touching the
    /// inventory.
    pub fn validate(spec: &TargetSpec) -> ResolveResult<()> {
        compile(spec).map(|_| ())
    }

    /// Resolve `spec` against one inventory snapshot.
    ///
    /// The result is de-duplicated by runtime id (first snapshot wins) and
    /// sorted by runtime id. An include that matches nothing yields an
    /// empty list.
    pub fn resolve(&self, spec: &TargetSpec) -> ResolveResult<Vec<Runtime>> {
        let (include, exclude) = compile(spec)?;
        let inventory = self
            .source
            .list_runtimes()
            .map_err(|e| ResolveError::Inventory(format!("{e:#}")))?;

        let mut seen = HashSet::new();
        let mut selected: Vec<Runtime> = Vec::new();
        for selector in &include {
            for runtime in inventory.iter().filter(|r| r.is_upgradable()) {
                if selector.matches(runtime) && seen.insert(runtime.runtime_id.clone()) {
                    selected.push(runtime.clone());
                }
            }
        }
        selected.retain(|runtime| !exclude.iter().any(|s| s.matches(runtime)));
        selected.sort_by(|a, b| a.runtime_id.cmp(&b.runtime_id));

        debug!(
            inventory = inventory.len(),
            resolved = selected.len(),
            "targets resolved"
        );
        Ok(selected)
    }
}

fn compile(spec: &TargetSpec) -> ResolveResult<(Vec<CompiledSelector>, Vec<CompiledSelector>)> {
    if spec.include.is_empty() {
        return Err(ResolveError::NoIncludeSelectors);
    }
    if spec.exclude.contains(&TargetSelector::All) {
        return Err(ResolveError::ExcludeAll);
    }
    let include = spec
        .include
        .iter()
        .map(CompiledSelector::compile)
        .collect::<ResolveResult<Vec<_>>>()?;
    let exclude = spec
        .exclude
        .iter()
        .map(CompiledSelector::compile)
        .collect::<ResolveResult<Vec<_>>>()?;
    Ok((include, exclude))
}
