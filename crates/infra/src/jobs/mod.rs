//! Background job scheduling.
//!
//! - `RetryPolicy`: bounded attempts with a fixed delay (the climate order
//!   poll loop)
//! - `PeriodicScheduler`: runs an ordered list of `ScheduledJob`s on a fixed
//!   interval with graceful shutdown

pub mod scheduler;
pub mod types;

pub use scheduler::{JobError, PeriodicScheduler, ScheduledJob, SchedulerHandle, SchedulerStats};
pub use types::{RetryPolicy, RunRecord, RunStatus};
