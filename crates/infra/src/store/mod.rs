//! Measurement and alert persistence.
//!
//! Two implementations per trait: in-memory (dev/test) and Postgres. Both keep
//! the same guarantees:
//! - measurements are unique per natural key and never updated
//! - at most one active threshold per indicator, with "deactivate previous +
//!   insert" serialised per indicator
//! - alerts are append-only

pub mod in_memory;
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use envwatch_core::{AlertId, DomainError, ThresholdId};
use envwatch_monitoring::{
    Alert, AlertThreshold, Indicator, IndicatorCode, Measurement, MeasurementKey, NewAlert, NewThreshold,
};

pub use in_memory::{InMemoryAlertStore, InMemoryMeasurementStore};
pub use postgres::{PostgresAlertStore, PostgresMeasurementStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Which of `keys` are already stored, in one lookup.
    async fn existing_keys(&self, keys: &[MeasurementKey]) -> StoreResult<HashSet<MeasurementKey>>;

    /// Insert rows, skipping keys that already exist. Returns the number inserted.
    async fn insert_batch(&self, rows: &[Measurement]) -> StoreResult<usize>;

    /// Rows observed at or after `from`, oldest first.
    async fn since(&self, from: DateTime<Utc>) -> StoreResult<Vec<Measurement>>;

    async fn count(&self) -> StoreResult<usize>;
}

#[async_trait]
pub trait ThresholdStore: Send + Sync {
    async fn indicators(&self) -> StoreResult<Vec<Indicator>>;

    async fn indicator(&self, code: &IndicatorCode) -> StoreResult<Option<Indicator>>;

    /// Insert an active threshold and deactivate the indicator's previous one as
    /// one step. Unknown indicators are [`StoreError::NotFound`].
    async fn create_threshold(&self, request: NewThreshold) -> StoreResult<AlertThreshold>;

    async fn threshold(&self, id: ThresholdId) -> StoreResult<Option<AlertThreshold>>;

    /// Active thresholds, oldest first.
    async fn active_thresholds(&self) -> StoreResult<Vec<AlertThreshold>>;

    /// Soft delete.
    async fn deactivate_threshold(&self, id: ThresholdId) -> StoreResult<AlertThreshold>;
}

/// Append-only alert log.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn append(&self, alerts: Vec<NewAlert>) -> StoreResult<Vec<Alert>>;

    /// All alerts, newest first.
    async fn list(&self) -> StoreResult<Vec<Alert>>;

    async fn get(&self, id: AlertId) -> StoreResult<Option<Alert>>;
}
