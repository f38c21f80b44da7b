//! The step extension interface.
//!
//! A step receives the current operation snapshot and returns the next one,
//! optionally asking to be re-run after a delay. Steps must be idempotent:
//! after a crash the executor re-runs the step under the persisted cursor.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use upgrader_state::RuntimeOperation;

/// Whether a failed step may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Error returned by a step. Carries the failure chain and the class the
/// step itself assigned; the registry's classifier has the final word.
#[derive(Debug, Error)]
#[error("{error:#}")]
pub struct StepError {
    class: ErrorClass,
    error: anyhow::Error,
}

impl StepError {
    pub fn transient(error: impl Into<anyhow::Error>) -> Self {
        Self {
            class: ErrorClass::Transient,
            error: error.into(),
        }
    }

    pub fn permanent(error: impl Into<anyhow::Error>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            error: error.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.error
    }
}

/// Per-invocation inputs that are not part of the operation itself.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub orchestration_id: Option<String>,
    /// Skip side effects; report what would have happened.
    pub dry_run: bool,
    /// 1-based invocation count of this step for this operation.
    pub attempt: u32,
}

/// Successful step result.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub operation: RuntimeOperation,
    /// `Duration::ZERO` advances the cursor; anything else re-runs the same
    /// step after that long.
    pub retry_after: Duration,
}

impl StepOutput {
    pub fn done(operation: RuntimeOperation) -> Self {
        Self {
            operation,
            retry_after: Duration::ZERO,
        }
    }

    pub fn retry_after(operation: RuntimeOperation, delay: Duration) -> Self {
        Self {
            operation,
            retry_after: delay,
        }
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name; persisted as the operation's step cursor.
    fn name(&self) -> &str;

    /// Per-step deadline override. `None` uses the executor default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(
        &self,
        operation: RuntimeOperation,
        ctx: &StepContext,
    ) -> Result<StepOutput, StepError>;
}
