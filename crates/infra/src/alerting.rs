//! Threshold checks against the current pollutant reading.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use envwatch_monitoring::{Alert, GeoPoint, evaluate_thresholds};

use crate::external::{PollutantApi, UpstreamError};
use crate::jobs::{JobError, ScheduledJob};
use crate::store::{AlertStore, StoreError, ThresholdStore};

#[derive(Debug, Error)]
pub enum AlertingError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Evaluates active thresholds against the provider's current reading.
///
/// Stateless: a threshold that stays exceeded raises a new alert on every check.
#[derive(Clone)]
pub struct ThresholdChecker {
    api: Arc<dyn PollutantApi>,
    thresholds: Arc<dyn ThresholdStore>,
    alerts: Arc<dyn AlertStore>,
    location: GeoPoint,
}

impl ThresholdChecker {
    pub fn new(
        api: Arc<dyn PollutantApi>,
        thresholds: Arc<dyn ThresholdStore>,
        alerts: Arc<dyn AlertStore>,
        location: GeoPoint,
    ) -> Self {
        Self {
            api,
            thresholds,
            alerts,
            location,
        }
    }

    /// Returns the alerts raised by this check.
    pub async fn check(&self) -> Result<Vec<Alert>, AlertingError> {
        let reading = self.api.current(self.location).await?.to_reading()?;
        let active = self.thresholds.active_thresholds().await?;
        let fired = evaluate_thresholds(&active, &reading);
        if fired.is_empty() {
            debug!(thresholds = active.len(), observed_at = %reading.observed_at, "no threshold exceeded");
            return Ok(Vec::new());
        }

        let raised = self.alerts.append(fired).await?;
        for alert in &raised {
            warn!(alert_id = %alert.id, value = ?alert.value, message = %alert.message, "alert raised");
        }
        Ok(raised)
    }
}

/// Scheduled `check_alerts`.
pub struct CheckAlertsJob {
    checker: ThresholdChecker,
}

impl CheckAlertsJob {
    pub fn new(checker: ThresholdChecker) -> Self {
        Self { checker }
    }
}

#[async_trait]
impl ScheduledJob for CheckAlertsJob {
    fn name(&self) -> &'static str {
        "check_alerts"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.checker.check().await?;
        Ok(())
    }
}
