//! Read-modify-write helpers over the [`Store`] CAS primitives.
//!
//! `apply` receives a fresh copy of the stored entity on every attempt and
//! returns `false` to abandon the write (for instance when the entity has
//! already moved past the state the caller wanted to change).

use tracing::trace;
use upgrader_core::now_utc;

use crate::error::{StateError, StateResult};
use crate::store::Store;
use crate::types::{Orchestration, RuntimeOperation};

/// Attempts before a contended update gives up with `Conflict`.
pub const CAS_ATTEMPTS: usize = 8;

/// Re-read, mutate and CAS-write an operation until the write lands.
///
/// Returns `Ok(None)` when `apply` declined the change. `updated_at` is
/// stamped here and never moves backwards.
pub fn modify_operation<F>(
    store: &dyn Store,
    id: &str,
    mut apply: F,
) -> StateResult<Option<RuntimeOperation>>
where
    F: FnMut(&mut RuntimeOperation) -> bool,
{
    let mut last = None;
    for attempt in 1..=CAS_ATTEMPTS {
        let mut op = store.get_operation(id)?;
        let previous = op.updated_at;
        if !apply(&mut op) {
            return Ok(None);
        }
        op.updated_at = now_utc().max(previous);
        match store.update_operation(&op) {
            Ok(stored) => return Ok(Some(stored)),
            Err(StateError::Conflict(msg)) => {
                trace!(operation = %id, attempt, "operation update lost a race");
                last = Some(msg);
            }
            Err(e) => return Err(e),
        }
    }
    Err(StateError::Conflict(last.unwrap_or_else(|| format!("operation {id}"))))
}

/// Same as [`modify_operation`], for orchestrations.
pub fn modify_orchestration<F>(
    store: &dyn Store,
    id: &str,
    mut apply: F,
) -> StateResult<Option<Orchestration>>
where
    F: FnMut(&mut Orchestration) -> bool,
{
    let mut last = None;
    for attempt in 1..=CAS_ATTEMPTS {
        let mut orchestration = store.get_orchestration(id)?;
        let previous = orchestration.updated_at;
        if !apply(&mut orchestration) {
            return Ok(None);
        }
        orchestration.updated_at = now_utc().max(previous);
        match store.update_orchestration(&orchestration) {
            Ok(stored) => return Ok(Some(stored)),
            Err(StateError::Conflict(msg)) => {
                trace!(orchestration = %id, attempt, "orchestration update lost a race");
                last = Some(msg);
            }
            Err(e) => return Err(e),
        }
    }
    Err(StateError::Conflict(
        last.unwrap_or_else(|| format!("orchestration {id}")),
    ))
}
