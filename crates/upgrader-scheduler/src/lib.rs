//! upgrader-scheduler — decides when and how many operations run.
//!
//! A [`Scheduler`] pushes an orchestration's operations through a bounded
//! [`OperationQueue`] to a pool of executor workers, shaped by a
//! [`Strategy`] and gated by maintenance windows.

pub mod queue;
pub mod scheduler;
pub mod strategy;
pub mod window;

pub use queue::{OperationQueue, QueueError};
pub use scheduler::{Job, ScheduleReport, Scheduler, WINDOW_MISSED};
pub use strategy::{Strategy, canary_batch_size};
pub use window::{effective_window, is_open, next_open, runtime_timezone};
