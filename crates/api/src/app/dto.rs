use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use envwatch_core::{DomainError, ThresholdId};
use envwatch_infra::ai::{FeatureForecast, WeatherForecast};
use envwatch_monitoring::{IndicatorCode, Measurement, NewAlert, NewThreshold, Severity};

// -------------------------
// Request DTOs
// -------------------------

/// Both fields are optional at the JSON level so a missing one is a 400 with a
/// readable message instead of a deserialisation rejection.
#[derive(Debug, Default, Deserialize)]
pub struct CreateThresholdRequest {
    pub indicator: Option<String>,
    pub threshold_value: Option<f64>,
}

impl CreateThresholdRequest {
    pub fn into_new_threshold(self) -> Result<NewThreshold, DomainError> {
        let (Some(indicator), Some(threshold_value)) = (self.indicator, self.threshold_value) else {
            return Err(DomainError::validation("indicator and threshold_value required"));
        };
        NewThreshold::new(IndicatorCode::parse(&indicator)?, threshold_value)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateAlertRequest {
    pub message: Option<String>,
    pub severity: Option<String>,
    pub threshold_id: Option<String>,
    pub value: Option<f64>,
}

impl CreateAlertRequest {
    /// A manual alert; severity defaults to `warning`.
    pub fn into_new_alert(self) -> Result<NewAlert, DomainError> {
        let severity = match self.severity.as_deref() {
            None => Severity::Warning,
            Some(raw) => Severity::parse(&raw.to_ascii_lowercase())
                .ok_or_else(|| DomainError::validation("severity must be one of: info, warning, critical"))?,
        };
        let threshold_id = self
            .threshold_id
            .as_deref()
            .map(str::parse::<ThresholdId>)
            .transpose()?;
        NewAlert::manual(threshold_id, self.value, self.message.unwrap_or_default(), severity)
    }
}

/// Query of `/predict/weather`; `feature` defaults to `TX`, `days` to 1.
#[derive(Debug, Default, Deserialize)]
pub struct WeatherQuery {
    pub feature: Option<String>,
    pub days: Option<String>,
}

/// Query of `/predict/weather/multiple`; `features` defaults to `TX,TN,RR`.
#[derive(Debug, Default, Deserialize)]
pub struct MultipleWeatherQuery {
    pub features: Option<String>,
    pub days: Option<String>,
}

pub const DEFAULT_FEATURE: &str = "TX";
pub const DEFAULT_MULTIPLE_FEATURES: &str = "TX,TN,RR";

/// `days` as sent; anything but an integer is a validation failure.
pub fn parse_days(raw: Option<&str>) -> Result<u32, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(1),
        Some(value) => value
            .parse::<u32>()
            .map_err(|_| format!("invalid parameters: days must be an integer, got {value:?}")),
    }
}

/// `TX, TN,,RR` -> `["TX", "TN", "RR"]`. Codes keep their case; validation is
/// left to the forecast service.
pub fn split_features(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}

// -------------------------
// Response DTOs
// -------------------------

/// A stored measurement as served by `/aq/last-month`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementView {
    pub datetime: String,
    pub aqi: u8,
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
}

impl From<&Measurement> for MeasurementView {
    fn from(m: &Measurement) -> Self {
        let c = &m.components;
        Self {
            datetime: m.observed_at.to_rfc3339_opts(SecondsFormat::Secs, false),
            aqi: m.aqi,
            co: c.co,
            no: c.no,
            no2: c.no2,
            o3: c.o3,
            so2: c.so2,
            pm2_5: c.pm2_5,
            pm10: c.pm10,
            nh3: c.nh3,
        }
    }
}

/// `{success: true, prediction, context}`.
pub fn weather_forecast_json(forecast: &WeatherForecast) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "prediction": forecast.prediction,
        "context": forecast.context,
    })
}

/// Per-feature entries of `/predict/weather/multiple`, keyed by the requested code.
pub fn feature_forecasts_json(outcomes: &[FeatureForecast]) -> serde_json::Map<String, serde_json::Value> {
    outcomes
        .iter()
        .map(|outcome| {
            let entry = match &outcome.result {
                Ok(forecast) => weather_forecast_json(forecast),
                Err(e) => crate::app::errors::forecast_failure(e),
            };
            (outcome.feature.clone(), entry)
        })
        .collect()
}
