//! Pollutant ingestion: provider history -> deduplicated measurement rows.
//!
//! A run looks up every candidate key in one query, plans the batch with
//! [`plan_ingestion`] and inserts the new rows in chunks. Re-running over an
//! overlapping window inserts nothing twice.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use envwatch_monitoring::{AirQualityReading, GeoPoint, candidate_keys, plan_ingestion};

use crate::external::openweather::readings;
use crate::external::{PollutantApi, UpstreamError};
use crate::jobs::{JobError, ScheduledJob};
use crate::store::{MeasurementStore, StoreError};

/// Batch size of the hourly job.
pub const LATEST_BATCH_SIZE: usize = 100;
/// Batch size of the historical backfill.
pub const HISTORY_BATCH_SIZE: usize = 1000;
pub const DEFAULT_HISTORY_DAYS: u32 = 182;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub incomplete: usize,
}

/// Dedup + chunked insert of readings for one location.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn MeasurementStore>,
    location: GeoPoint,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn MeasurementStore>, location: GeoPoint, batch_size: usize) -> Self {
        Self {
            store,
            location,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn ingest(&self, readings: &[AirQualityReading]) -> Result<IngestionReport, StoreError> {
        let keys = candidate_keys(self.location, readings);
        let existing = self.store.existing_keys(&keys).await?;
        let plan = plan_ingestion(self.location, readings, &existing);

        let mut inserted = 0;
        for chunk in plan.to_insert.chunks(self.batch_size) {
            inserted += self.store.insert_batch(chunk).await?;
        }

        // Rows another writer stored between lookup and insert count as duplicates.
        let lost_races = plan.to_insert.len() - inserted.min(plan.to_insert.len());
        Ok(IngestionReport {
            fetched: readings.len(),
            inserted,
            duplicates: plan.duplicates + lost_races,
            incomplete: plan.incomplete,
        })
    }
}

/// Pollutant provider history into the measurement store.
#[derive(Clone)]
pub struct AirQualityIngestion {
    api: Arc<dyn PollutantApi>,
    store: Arc<dyn MeasurementStore>,
    location: GeoPoint,
}

impl AirQualityIngestion {
    pub fn new(api: Arc<dyn PollutantApi>, store: Arc<dyn MeasurementStore>, location: GeoPoint) -> Self {
        Self { api, store, location }
    }

    /// The hour ending at `now`.
    pub async fn fetch_latest(&self, now: DateTime<Utc>) -> Result<IngestionReport, IngestionError> {
        self.ingest_window(now - Duration::hours(1), now, LATEST_BATCH_SIZE).await
    }

    /// The `days` days ending at `now`.
    pub async fn import_history(&self, days: u32, now: DateTime<Utc>) -> Result<IngestionReport, IngestionError> {
        self.ingest_window(now - Duration::days(i64::from(days)), now, HISTORY_BATCH_SIZE)
            .await
    }

    async fn ingest_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<IngestionReport, IngestionError> {
        let records = self.api.history(self.location, start, end).await?;
        let readings = readings(&records)?;
        let report = IngestionPipeline::new(self.store.clone(), self.location, batch_size)
            .ingest(&readings)
            .await?;

        if report.incomplete > 0 {
            warn!(incomplete = report.incomplete, "skipped incomplete provider records");
        }
        info!(
            %start,
            %end,
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "air quality ingested"
        );
        Ok(report)
    }
}

/// Scheduled `fetch_latest_air`.
pub struct FetchLatestAirJob {
    ingestion: AirQualityIngestion,
}

impl FetchLatestAirJob {
    pub fn new(ingestion: AirQualityIngestion) -> Self {
        Self { ingestion }
    }
}

#[async_trait]
impl ScheduledJob for FetchLatestAirJob {
    fn name(&self) -> &'static str {
        "fetch_latest_air"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.ingestion.fetch_latest(Utc::now()).await?;
        Ok(())
    }
}
