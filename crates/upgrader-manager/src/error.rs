//! Error types for the orchestration manager.

use thiserror::Error;
use upgrader_executor::ExecutorError;
use upgrader_inventory::ResolveError;
use upgrader_state::StateError;

pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// The entity is not in a state that allows the request.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("orchestration {0} is already terminal")]
    AlreadyTerminal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StateError> for ManagerError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => Self::NotFound(what),
            StateError::AlreadyExists(what) => Self::Conflict(format!("already exists: {what}")),
            StateError::Conflict(what) => Self::Conflict(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ResolveError> for ManagerError {
    fn from(e: ResolveError) -> Self {
        if e.is_invalid_input() {
            Self::InvalidSelector(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<ExecutorError> for ManagerError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Store(inner) => inner.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}
