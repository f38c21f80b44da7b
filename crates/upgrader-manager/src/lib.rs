//! upgrader-manager — the top-level orchestration state machine.
//!
//! [`OrchestrationManager`] accepts orchestration requests, resolves their
//! targets, drives the resulting operations through the scheduler and
//! executor, and answers the read-side queries of the REST surface.

pub mod error;
pub mod manager;

pub use error::{ManagerError, ManagerResult};
pub use manager::OrchestrationManager;
pub use upgrader_state::wire::{OrchestrationStatus, RetryOutcome, RuntimeView};
