use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use envwatch_core::{AlertId, ThresholdId};
use envwatch_monitoring::{
    Alert, AlertThreshold, Indicator, IndicatorCode, Measurement, MeasurementKey, NewAlert, NewThreshold,
    ThresholdBook, seed_indicators,
};

use super::{AlertStore, MeasurementStore, StoreError, StoreResult, ThresholdStore};

/// In-memory measurement table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMeasurementStore {
    rows: RwLock<BTreeMap<MeasurementKey, Measurement>>,
}

impl InMemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeasurementStore for InMemoryMeasurementStore {
    async fn existing_keys(&self, keys: &[MeasurementKey]) -> StoreResult<HashSet<MeasurementKey>> {
        let rows = self.rows.read();
        Ok(keys.iter().filter(|k| rows.contains_key(k)).copied().collect())
    }

    async fn insert_batch(&self, batch: &[Measurement]) -> StoreResult<usize> {
        let mut rows = self.rows.write();
        let mut inserted = 0;
        for m in batch {
            if let std::collections::btree_map::Entry::Vacant(slot) = rows.entry(m.key()) {
                slot.insert(m.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn since(&self, from: DateTime<Utc>) -> StoreResult<Vec<Measurement>> {
        let mut found: Vec<Measurement> = self
            .rows
            .read()
            .values()
            .filter(|m| m.observed_at >= from)
            .cloned()
            .collect();
        found.sort_by_key(|m| (m.observed_at, m.key()));
        Ok(found)
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.rows.read().len())
    }
}

#[derive(Debug)]
struct AlertState {
    indicators: BTreeMap<IndicatorCode, Indicator>,
    thresholds: ThresholdBook,
    alerts: Vec<Alert>,
}

/// In-memory indicators, thresholds and alerts, seeded with the default indicators.
///
/// One write lock covers the whole state, so threshold creation is serialised.
#[derive(Debug)]
pub struct InMemoryAlertStore {
    inner: RwLock<AlertState>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AlertState {
                indicators: seed_indicators().into_iter().map(|i| (i.code.clone(), i)).collect(),
                thresholds: ThresholdBook::new(),
                alerts: Vec::new(),
            }),
        }
    }
}

impl Default for InMemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThresholdStore for InMemoryAlertStore {
    async fn indicators(&self) -> StoreResult<Vec<Indicator>> {
        Ok(self.inner.read().indicators.values().cloned().collect())
    }

    async fn indicator(&self, code: &IndicatorCode) -> StoreResult<Option<Indicator>> {
        Ok(self.inner.read().indicators.get(code).cloned())
    }

    async fn create_threshold(&self, request: NewThreshold) -> StoreResult<AlertThreshold> {
        let mut state = self.inner.write();
        if !state.indicators.contains_key(&request.indicator) {
            return Err(StoreError::NotFound(format!("indicator {}", request.indicator)));
        }
        let (created, deactivated) = state.thresholds.create(request, ThresholdId::new(), Utc::now())?;
        if !deactivated.is_empty() {
            tracing::debug!(indicator = %created.indicator, ?deactivated, "previous thresholds deactivated");
        }
        Ok(created)
    }

    async fn threshold(&self, id: ThresholdId) -> StoreResult<Option<AlertThreshold>> {
        Ok(self.inner.read().thresholds.get(id).cloned())
    }

    async fn active_thresholds(&self) -> StoreResult<Vec<AlertThreshold>> {
        Ok(self.inner.read().thresholds.active())
    }

    async fn deactivate_threshold(&self, id: ThresholdId) -> StoreResult<AlertThreshold> {
        self.inner
            .write()
            .thresholds
            .deactivate(id)
            .map_err(|_| StoreError::NotFound(format!("threshold {id}")))
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn append(&self, alerts: Vec<NewAlert>) -> StoreResult<Vec<Alert>> {
        let mut state = self.inner.write();
        if let Some(missing) = alerts
            .iter()
            .filter_map(|a| a.threshold_id)
            .find(|id| state.thresholds.get(*id).is_none())
        {
            return Err(StoreError::NotFound(format!("threshold {missing}")));
        }

        let now = Utc::now();
        let created: Vec<Alert> = alerts
            .into_iter()
            .map(|a| a.into_alert(AlertId::new(), now))
            .collect();
        state.alerts.extend(created.iter().cloned());
        Ok(created)
    }

    async fn list(&self) -> StoreResult<Vec<Alert>> {
        let mut alerts = self.inner.read().alerts.clone();
        alerts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(alerts)
    }

    async fn get(&self, id: AlertId) -> StoreResult<Option<Alert>> {
        Ok(self.inner.read().alerts.iter().find(|a| a.id == id).cloned())
    }
}
