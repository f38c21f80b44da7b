//! upgrader-state — durable state for the upgrade orchestrator.
//!
//! Holds orchestrations, per-runtime operations of every kind, and the
//! runtime inventory snapshot behind the [`Store`] trait. Two drivers are
//! provided: `RedbStore` (persistent, or redb's in-memory backend; behind
//! the default `redb` feature) and [`MemoryStore`] (plain maps under a
//! mutex). [`wire`] holds the REST bodies so clients can share them
//! without linking a storage engine.
//!
//! # Concurrency
//!
//! Updates are optimistic: each entity carries a `version`, and a write is
//! accepted only if it was based on the stored version. The helpers in
//! [`cas`] wrap the read-modify-write loop.

pub mod cas;
pub mod error;
pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;
pub mod store;
#[cfg(feature = "redb")]
pub mod tables;
pub mod types;
pub mod wire;

pub use cas::{modify_operation, modify_orchestration};
pub use error::{StateError, StateResult};
pub use memory::MemoryStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbStore;
pub use store::Store;
pub use types::*;
