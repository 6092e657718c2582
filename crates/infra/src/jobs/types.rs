//! Poll bounds and job run bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// At most `max_attempts` tries, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-indexed).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Outcome of one scheduled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    Completed,
    /// A job failed; later jobs of the same run were skipped.
    Failed { job: String, error: String },
}

/// Record of the last scheduled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub duration_ms: u64,
}

impl RunRecord {
    pub fn new(started_at: DateTime<Utc>, status: RunStatus) -> Self {
        let finished_at = Utc::now();
        Self {
            started_at,
            finished_at,
            status,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
