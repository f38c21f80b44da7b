//! Error types for the executor.

use thiserror::Error;
use upgrader_state::{OperationKind, StateError};

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Failures that leave an operation where it was. The operation stays
/// `in-progress` and a later driver resumes it from its step cursor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] StateError),

    #[error("no step chain registered for {0} operations")]
    UnknownKind(OperationKind),

    #[error("{kind} chain has no step named {step}")]
    UnknownStep { kind: OperationKind, step: String },
}
