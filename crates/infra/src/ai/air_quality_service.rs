use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use envwatch_ai::{AiJob, AirQualityClassificationJob, AirQualityClassifier};
use envwatch_monitoring::GeoPoint;

use super::ForecastError;
use crate::config::ConfigError;
use crate::external::openweather::readings;
use crate::external::{AirPollutionRecord, PollutantApi};

/// Hours of pollutant history behind a classification.
pub const CLASSIFICATION_WINDOW_HOURS: i64 = 10;

/// Recent pollutant history and its air-quality classification.
#[derive(Clone)]
pub struct AirQualityService {
    api: Option<Arc<dyn PollutantApi>>,
    classifier: Arc<AirQualityClassifier>,
    location: GeoPoint,
}

impl AirQualityService {
    /// `api` is `None` when the pollutant provider has no credential.
    pub fn new(api: Option<Arc<dyn PollutantApi>>, classifier: Arc<AirQualityClassifier>, location: GeoPoint) -> Self {
        Self {
            api,
            classifier,
            location,
        }
    }

    /// Provider records of the last ten hours, unchanged.
    pub async fn last_hours(&self, now: DateTime<Utc>) -> Result<Vec<AirPollutionRecord>, ForecastError> {
        let api = self
            .api
            .as_ref()
            .ok_or(ForecastError::Config(ConfigError::Missing("OPENWEATHERMAP_API_KEY")))?;
        let start = now - Duration::hours(CLASSIFICATION_WINDOW_HOURS);
        Ok(api.history(self.location, start, now).await?)
    }

    /// Class probabilities over the last ten hours.
    pub async fn classify(&self, now: DateTime<Utc>) -> Result<Vec<f64>, ForecastError> {
        let records = self.last_hours(now).await?;
        let job = AirQualityClassificationJob::new(self.classifier.clone(), readings(&records)?);
        let probabilities = job.run()?;
        tracing::debug!(job = job.name(), ?probabilities, "air quality classified");
        Ok(probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::tests::{FakePollutantApi, base_time, record};
    use envwatch_ai::{AiError, AiResult, MinMaxScaler, SequenceClassifier};

    /// Logits rising with the class index.
    struct RisingLogits;

    impl SequenceClassifier for RisingLogits {
        fn input_size(&self) -> usize {
            9
        }

        fn classes(&self) -> usize {
            5
        }

        fn logits(&self, window: &[Vec<f64>]) -> AiResult<Vec<f64>> {
            assert_eq!(window.len(), 10);
            Ok(vec![0.0, 1.0, 2.0, 3.0, 4.0])
        }
    }

    fn classifier(dir: &std::path::Path) -> Arc<AirQualityClassifier> {
        let params: serde_json::Map<String, serde_json::Value> = MinMaxScaler::CHANNELS
            .iter()
            .map(|c| (c.to_string(), serde_json::json!({"min": 0.0, "max": 500.0, "scale": 0.002})))
            .collect();
        let path = dir.join("scaler.json");
        std::fs::write(&path, serde_json::to_vec(&params).unwrap()).unwrap();
        let scaler = MinMaxScaler::load(&path).unwrap();
        Arc::new(AirQualityClassifier::new(scaler, Arc::new(RisingLogits)).unwrap())
    }

    fn lyon() -> GeoPoint {
        GeoPoint::new(45.75, 4.85)
    }

    #[tokio::test]
    async fn ten_complete_hours_yield_a_distribution() {
        let dir = tempfile::tempdir().unwrap();
        let now = base_time();
        let records = (0..10).map(|h| record(now - Duration::hours(h), 230.0)).collect();
        let api = Arc::new(FakePollutantApi::with_records(records));
        let service = AirQualityService::new(Some(api.clone() as Arc<dyn PollutantApi>), classifier(dir.path()), lyon());

        let probabilities = service.classify(now).await.unwrap();
        assert_eq!(probabilities.len(), 5);
        assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-4);
        assert!(probabilities.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(api.windows.lock().as_slice(), &[(now - Duration::hours(10), now)]);
    }

    #[tokio::test]
    async fn fewer_than_ten_complete_hours_is_incomplete_data() {
        let dir = tempfile::tempdir().unwrap();
        let now = base_time();
        let mut records: Vec<_> = (0..10).map(|h| record(now - Duration::hours(h), 230.0)).collect();
        records[3].components.so2 = None;
        let service = AirQualityService::new(
            Some(Arc::new(FakePollutantApi::with_records(records))),
            classifier(dir.path()),
            lyon(),
        );

        let err = service.classify(now).await.unwrap_err();
        assert!(matches!(err, ForecastError::Ai(AiError::DataIncomplete(_))));
    }

    #[tokio::test]
    async fn history_is_passed_through_and_needs_a_credential() {
        let dir = tempfile::tempdir().unwrap();
        let now = base_time();
        let records: Vec<_> = (0..3).map(|h| record(now - Duration::hours(h), 200.0 + h as f64)).collect();
        let service = AirQualityService::new(
            Some(Arc::new(FakePollutantApi::with_records(records.clone()))),
            classifier(dir.path()),
            lyon(),
        );
        assert_eq!(service.last_hours(now).await.unwrap(), records);

        let unconfigured = AirQualityService::new(None, classifier(dir.path()), lyon());
        assert!(matches!(
            unconfigured.classify(now).await,
            Err(ForecastError::Config(ConfigError::Missing(_)))
        ));
    }
}
