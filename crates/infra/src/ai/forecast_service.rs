//! Weather forecasting on top of the climate provider and the model cache.
//!
//! A prediction fetches the recent climate window, loads the model for
//! `(feature, days)` (training and persisting it on that same window when no
//! artifact exists) and predicts from the window's last complete row.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use envwatch_ai::{
    AiError, AiJob, ForecastModel, ForecastTrainingJob, MAX_HORIZON_DAYS, ModelKey, RawFrame, TrainedForecast,
    TrainingConfig, WeatherFeature,
};

use super::{ForecastError, ModelCache};
use crate::config::ConfigError;
use crate::external::ClimateAcquisition;

/// Days of recent history behind a prediction.
pub const FORECAST_WINDOW_DAYS: u32 = 30;
/// Days of history behind an offline training run.
pub const TRAINING_WINDOW_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherPrediction {
    pub value: f64,
    pub unit: &'static str,
    /// Human-readable feature label.
    pub feature: &'static str,
    pub days_ahead: u32,
    pub prediction_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub target_feature: &'static str,
    pub days_to_predict: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastContext {
    pub latest_data: Option<Map<String, Value>>,
    pub station_id: String,
    pub model_info: ModelInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherForecast {
    pub prediction: WeatherPrediction,
    pub context: ForecastContext,
}

/// Outcome of one feature in a multi-feature request.
#[derive(Debug)]
pub struct FeatureForecast {
    pub feature: String,
    pub result: Result<WeatherForecast, ForecastError>,
}

/// `YYYY-MM-DD` of `now + days`.
pub fn prediction_date(now: DateTime<Utc>, days: u32) -> String {
    (now + Duration::days(i64::from(days))).format("%Y-%m-%d").to_string()
}

/// Validate a `(feature, days)` request.
pub fn parse_request(feature: &str, days: u32) -> Result<(WeatherFeature, ModelKey), ForecastError> {
    let Some(parsed) = WeatherFeature::parse(feature) else {
        let valid: Vec<&str> = WeatherFeature::ALL.iter().map(|f| f.code()).collect();
        return Err(ForecastError::Validation(format!(
            "invalid feature {feature:?}, must be one of: {}",
            valid.join(", ")
        )));
    };
    if !(1..=MAX_HORIZON_DAYS).contains(&days) {
        return Err(ForecastError::Validation(format!(
            "days must be between 1 and {MAX_HORIZON_DAYS}"
        )));
    }
    let key = ModelKey::for_feature(parsed, days)?;
    Ok((parsed, key))
}

pub struct ForecastService {
    climate: Option<ClimateAcquisition>,
    cache: Arc<ModelCache>,
    station_id: String,
    training: TrainingConfig,
}

impl ForecastService {
    /// `climate` is `None` when the climate provider has no credential; every
    /// request then fails with a configuration error.
    pub fn new(climate: Option<ClimateAcquisition>, cache: Arc<ModelCache>, station_id: impl Into<String>) -> Self {
        Self {
            climate,
            cache,
            station_id: station_id.into(),
            training: TrainingConfig::default(),
        }
    }

    pub fn with_training_config(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    fn climate(&self) -> Result<&ClimateAcquisition, ForecastError> {
        self.climate
            .as_ref()
            .ok_or(ForecastError::Config(ConfigError::Missing("METEOFRANCE_API_KEY")))
    }

    /// Forecast `feature` (`TX`, `TN`, `RR`, `TM`, `TAMPLI`) `days` ahead of `now`.
    pub async fn predict_weather(
        &self,
        feature: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<WeatherForecast, ForecastError> {
        let (feature, key) = parse_request(feature, days)?;
        let climate = self.climate()?;
        let recent = climate.recent_data(&self.station_id, FORECAST_WINDOW_DAYS, now).await?;
        self.predict_from(feature, &key, &recent, now).await
    }

    /// Forecast several features over one recent window.
    ///
    /// Per-feature failures (unknown feature, no prediction) are reported in
    /// place; the remaining features are still predicted.
    pub async fn predict_many(
        &self,
        features: &[String],
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeatureForecast>, ForecastError> {
        if !(1..=MAX_HORIZON_DAYS).contains(&days) {
            return Err(ForecastError::Validation(format!(
                "days must be between 1 and {MAX_HORIZON_DAYS}"
            )));
        }
        let climate = self.climate()?;
        let recent = climate.recent_data(&self.station_id, FORECAST_WINDOW_DAYS, now).await?;

        let mut outcomes = Vec::with_capacity(features.len());
        for feature in features {
            let result = match parse_request(feature, days) {
                Ok((parsed, key)) => self.predict_from(parsed, &key, &recent, now).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!(feature = %feature, error = %e, "feature forecast failed");
            }
            outcomes.push(FeatureForecast {
                feature: feature.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    async fn predict_from(
        &self,
        feature: WeatherFeature,
        key: &ModelKey,
        recent: &RawFrame,
        now: DateTime<Utc>,
    ) -> Result<WeatherForecast, ForecastError> {
        let model = self.model_for(key, recent).await?;
        let value = model.predict(recent)?.ok_or(ForecastError::NoPrediction)?;

        Ok(WeatherForecast {
            prediction: WeatherPrediction {
                value: (value * 100.0).round() / 100.0,
                unit: feature.unit(),
                feature: feature.label(),
                days_ahead: key.horizon(),
                prediction_date: prediction_date(now, key.horizon()),
            },
            context: ForecastContext {
                latest_data: recent.last_row_json(),
                station_id: self.station_id.clone(),
                model_info: ModelInfo {
                    target_feature: feature.code(),
                    days_to_predict: key.horizon(),
                },
            },
        })
    }

    /// Cached model, or one trained on `history` and persisted when none exists.
    async fn model_for(&self, key: &ModelKey, history: &RawFrame) -> Result<Arc<ForecastModel>, ForecastError> {
        match self.cache.get(key) {
            Ok(model) => Ok(model),
            Err(e) if e.is_not_found() => {
                info!(model = %key, "no persisted model, training on demand");
                let trained = self.train_model(key.clone(), history.clone()).await?;
                Ok(self.cache.get(&trained.model.key)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Train `key` on `history` and persist it as the live version, both off the
    /// async runtime.
    pub async fn train_model(&self, key: ModelKey, history: RawFrame) -> Result<TrainedForecast, ForecastError> {
        let job = ForecastTrainingJob::new(key, history).with_config(self.training.clone());
        let name = job.name();
        let cache = self.cache.clone();
        let trained = tokio::task::spawn_blocking(move || {
            let trained = job.run()?;
            cache.put(trained.model.clone())?;
            Ok::<_, AiError>(trained)
        })
        .await
        .map_err(|e| AiError::Internal(format!("{name} task failed: {e}")))??;

        info!(model = %trained.model.key, test_rmse = trained.metrics.test_rmse, "forecast model persisted");
        Ok(trained)
    }

    /// A year of history for offline training.
    pub async fn training_history(&self, now: DateTime<Utc>) -> Result<RawFrame, ForecastError> {
        Ok(self
            .climate()?
            .recent_data(&self.station_id, TRAINING_WINDOW_DAYS, now)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fixtures::{climate_csv, quick_training};
    use crate::config::OrderPolling;
    use crate::external::meteofrance::tests::FakeOrderApi;
    use crate::external::{OrderFile, parse_climate_csv};
    use chrono::TimeZone;
    use envwatch_ai::ArtifactStore;
    use std::time::Duration as StdDuration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 8, 9, 30, 0).unwrap()
    }

    fn service(api: Arc<FakeOrderApi>, dir: &std::path::Path) -> ForecastService {
        let climate = ClimateAcquisition::new(
            api,
            OrderPolling {
                max_retries: 3,
                retry_delay: StdDuration::ZERO,
            },
        );
        ForecastService::new(
            Some(climate),
            Arc::new(ModelCache::new(ArtifactStore::new(dir))),
            "69123002",
        )
        .with_training_config(quick_training())
    }

    fn queue(api: &FakeOrderApi, payload: &str, times: usize) {
        for _ in 0..times {
            api.polls.lock().push_back(Ok(OrderFile::Ready(payload.to_string())));
        }
    }

    #[test]
    fn requests_are_validated() {
        assert!(matches!(parse_request("XX", 1), Err(ForecastError::Validation(_))));
        assert!(matches!(parse_request("TX", 0), Err(ForecastError::Validation(_))));
        assert!(matches!(parse_request("TX", 8), Err(ForecastError::Validation(_))));
        let (feature, key) = parse_request("TAMPLI", 7).unwrap();
        assert_eq!(feature, WeatherFeature::Tampli);
        assert_eq!(key.slug(), "TAMPLI_7day");
    }

    #[test]
    fn prediction_dates_are_calendar_days_ahead() {
        assert_eq!(prediction_date(now(), 1), "2025-07-09");
        assert_eq!(prediction_date(now(), 7), "2025-07-15");
    }

    #[tokio::test]
    async fn missing_credentials_are_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = ForecastService::new(None, Arc::new(ModelCache::new(ArtifactStore::new(dir.path()))), "69123002");

        let err = service.predict_weather("TX", 1, now()).await.unwrap_err();
        assert!(matches!(err, ForecastError::Config(ConfigError::Missing(_))));
        assert!(matches!(
            service.predict_weather("XX", 1, now()).await,
            Err(ForecastError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn a_missing_model_is_trained_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeOrderApi::default());
        queue(&api, &climate_csv(60), 2);
        let service = service(api.clone(), dir.path());

        let first = service.predict_weather("TX", 2, now()).await.unwrap();
        assert!(first.prediction.value.is_finite());
        assert_eq!(first.prediction.unit, "°C");
        assert_eq!(first.prediction.feature, "Maximum Temperature");
        assert_eq!(first.prediction.prediction_date, "2025-07-10");
        assert_eq!(first.context.station_id, "69123002");
        assert_eq!(
            first.context.model_info,
            ModelInfo {
                target_feature: "TX",
                days_to_predict: 2
            }
        );
        let latest = first.context.latest_data.as_ref().unwrap();
        assert!(latest.contains_key("DATE"));

        let key = ModelKey::for_feature(WeatherFeature::Tx, 2).unwrap();
        assert!(service.cache().artifacts().exists(&key));

        let second = service.predict_weather("TX", 2, now()).await.unwrap();
        assert_eq!(second.prediction.value, first.prediction.value);
        assert_eq!(api.orders.lock().len(), 2);
    }

    #[tokio::test]
    async fn a_window_too_short_for_the_lags_has_no_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeOrderApi::ready_with(&climate_csv(8)));
        let service = service(api, dir.path());

        let key = ModelKey::for_feature(WeatherFeature::Rr, 1).unwrap();
        let history = parse_climate_csv(&climate_csv(90)).unwrap();
        service.train_model(key, history).await.unwrap();

        let err = service.predict_weather("RR", 1, now()).await.unwrap_err();
        assert!(matches!(err, ForecastError::NoPrediction));
    }

    #[tokio::test]
    async fn many_features_continue_past_a_failing_one() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeOrderApi::ready_with(&climate_csv(60)));
        let service = service(api.clone(), dir.path());

        let features = vec!["TN".to_string(), "BOGUS".to_string(), "RR".to_string()];
        let outcomes = service.predict_many(&features, 1, now()).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(ForecastError::Validation(_))));
        assert_eq!(outcomes[2].result.as_ref().unwrap().prediction.unit, "mm");
        assert_eq!(api.orders.lock().len(), 1);
    }

    #[tokio::test]
    async fn upstream_failures_surface_as_upstream_errors() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeOrderApi {
            reject: true,
            ..FakeOrderApi::default()
        });
        let service = service(api, dir.path());

        let err = service.predict_weather("TM", 1, now()).await.unwrap_err();
        assert!(matches!(err, ForecastError::Upstream(_)));
    }
}
