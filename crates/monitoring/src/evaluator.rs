//! Threshold evaluation rule.
//!
//! Stateless per run: every run whose reading still meets a threshold raises a new
//! alert. Callers wanting edge-triggered behaviour deduplicate downstream.

use crate::alert::{AlertOrigin, NewAlert, Severity};
use crate::indicator::IndicatorCode;
use crate::measurement::{AirQualityReading, Pollutant};
use crate::threshold::AlertThreshold;

impl AirQualityReading {
    /// Current value of an indicator: the index for `aqi`, else the matching
    /// pollutant concentration. Unknown codes and missing fields yield `None`.
    pub fn value_of(&self, indicator: &IndicatorCode) -> Option<f64> {
        if indicator.is_aggregate_index() {
            return self.aqi.map(f64::from);
        }
        Pollutant::from_code(indicator.as_str()).and_then(|p| self.components.get(p))
    }
}

/// Alerts raised by `reading` against the active thresholds.
///
/// Inactive thresholds are ignored; a threshold whose indicator has no value in
/// the reading never fires.
pub fn evaluate_thresholds(thresholds: &[AlertThreshold], reading: &AirQualityReading) -> Vec<NewAlert> {
    thresholds
        .iter()
        .filter(|t| t.active)
        .filter_map(|t| {
            let value = reading.value_of(&t.indicator)?;
            (value >= t.threshold_value).then(|| NewAlert {
                threshold_id: Some(t.id),
                value: Some(value),
                message: format!(
                    "threshold exceeded for {}: {} (threshold: {})",
                    t.indicator, value, t.threshold_value
                ),
                severity: Severity::Critical,
                origin: AlertOrigin::Automatic,
            })
        })
        .collect()
}
