//! Periodic scheduler for the ingestion and alerting jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::types::{RunRecord, RunStatus};

pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of scheduled work. Jobs must be safe to re-run after a failure.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<(), JobError>;
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub runs: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub last_run: Option<RunRecord>,
}

impl SchedulerStats {
    fn record(&mut self, run: RunRecord) {
        self.runs += 1;
        if run.succeeded() {
            self.runs_succeeded += 1;
        } else {
            self.runs_failed += 1;
        }
        self.last_run = Some(run);
    }
}

/// Runs its jobs in order on a fixed interval, starting immediately.
///
/// A failing job ends the current run; the next tick starts over from the first
/// job. Failures are logged and never stop the scheduler.
pub struct PeriodicScheduler {
    name: &'static str,
    interval: Duration,
    jobs: Vec<Arc<dyn ScheduledJob>>,
}

impl PeriodicScheduler {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Run every job once, in order.
    pub async fn run_once(&self) -> RunRecord {
        let started = Utc::now();
        for job in &self.jobs {
            debug!(scheduler = self.name, job = job.name(), "job started");
            if let Err(e) = job.run().await {
                error!(scheduler = self.name, job = job.name(), error = %e, "job failed, run aborted");
                return RunRecord::new(
                    started,
                    RunStatus::Failed {
                        job: job.name().to_string(),
                        error: e.to_string(),
                    },
                );
            }
        }
        let record = RunRecord::new(started, RunStatus::Completed);
        info!(scheduler = self.name, duration_ms = record.duration_ms, "scheduled run completed");
        record
    }

    /// Start the scheduler on the current tokio runtime.
    ///
    /// Dropping the handle stops the scheduler after the in-flight run, like
    /// [`SchedulerHandle::shutdown`] without waiting.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let shared = stats.clone();

        let join = tokio::spawn(async move {
            info!(scheduler = self.name, interval_secs = self.interval.as_secs(), jobs = ?self.job_names(), "scheduler started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // Shutdown has priority over a due tick.
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                // Not raced against shutdown: an in-flight run always finishes.
                let record = self.run_once().await;
                shared.lock().record(record);
            }

            info!(scheduler = self.name, "scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for the in-flight run, if any.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }
}
