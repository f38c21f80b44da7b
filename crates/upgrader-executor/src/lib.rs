//! upgrader-executor — runs a single operation through its step chain.
//!
//! Steps are registered per operation kind in a [`StepRegistry`]. The
//! [`Executor`] invokes them in order, persists progress after every
//! transition, retries transient failures with [`Backoff`] until the
//! per-step deadline, and honors the orchestration's [`CancelSignal`].

pub mod backoff;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod kyma;
pub mod registry;
pub mod step;

pub use backoff::Backoff;
pub use cancel::CancelSignal;
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{Executor, RunContext, RunOutcome, TIMEOUT_PREFIX, cancel_operation};
pub use kyma::{LoggingBackend, UpgradeBackend, UpgradeStatus};
pub use registry::{Classifier, OperationCapability, StepRegistry, classify_by_step};
pub use step::{ErrorClass, Step, StepContext, StepError, StepOutput};
