//! redb table definitions for the orchestrator state store.
//!
//! Entity tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The live-operation index maps `{orchestration_id}:{runtime_id}`
//! to the id of the operation currently holding that pair.

use redb::TableDefinition;

/// Orchestrations keyed by `{orchestration_id}`.
pub const ORCHESTRATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("orchestrations");

/// Operations of every kind keyed by `{operation_id}`.
pub const OPERATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("operations");

/// Non-terminal operations keyed by `{orchestration_id}:{runtime_id}`.
pub const ACTIVE_OPERATIONS: TableDefinition<&str, &str> =
    TableDefinition::new("active_operations");

/// Runtime inventory snapshots keyed by `{runtime_id}`.
pub const RUNTIMES: TableDefinition<&str, &[u8]> = TableDefinition::new("runtimes");

/// Shape shared by every JSON-valued table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
