//! Air-quality class probabilities from the last ten hourly readings.

use std::path::Path;
use std::sync::Arc;

use envwatch_monitoring::AirQualityReading;

use crate::classifier::{LstmClassifier, SequenceClassifier};
use crate::job::AiJob;
use crate::result::{AiError, AiResult};
use crate::scaler::MinMaxScaler;

/// Hourly readings per classification window.
pub const WINDOW: usize = 10;

/// Number of air-quality classes.
pub const CLASSES: usize = 5;

/// Decimal places kept in the returned probabilities.
pub const PROBABILITY_DECIMALS: i32 = 5;

pub const WEIGHTS_FILE: &str = "air_quality_lstm.json";
pub const SCALER_PARAMS_FILE: &str = "air_quality_scaler_params.json";

/// Softmax that subtracts the largest logit first, so large logits cannot overflow.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// The most recent [`WINDOW`] complete readings, oldest first.
///
/// `readings` must be in chronological order. Readings missing the index or any
/// pollutant are skipped; fewer than [`WINDOW`] complete readings is
/// [`AiError::DataIncomplete`].
pub fn complete_window(readings: &[AirQualityReading]) -> AiResult<Vec<[f64; 9]>> {
    let complete: Vec<[f64; 9]> = readings.iter().filter_map(AirQualityReading::feature_row).collect();
    if complete.len() < WINDOW {
        return Err(AiError::DataIncomplete(format!(
            "only {} valid rows, need {WINDOW}",
            complete.len()
        )));
    }
    Ok(complete[complete.len() - WINDOW..].to_vec())
}

/// Scaler and classifier loaded once at startup and shared read-only.
pub struct AirQualityClassifier {
    scaler: MinMaxScaler,
    model: Arc<dyn SequenceClassifier>,
}

impl std::fmt::Debug for AirQualityClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirQualityClassifier")
            .field("input_size", &self.model.input_size())
            .field("classes", &self.model.classes())
            .finish()
    }
}

impl AirQualityClassifier {
    pub fn new(scaler: MinMaxScaler, model: Arc<dyn SequenceClassifier>) -> AiResult<Self> {
        if model.input_size() != MinMaxScaler::CHANNELS.len() || model.classes() != CLASSES {
            return Err(AiError::InvalidInput(format!(
                "classifier must map {} channels to {CLASSES} classes, got {} -> {}",
                MinMaxScaler::CHANNELS.len(),
                model.input_size(),
                model.classes()
            )));
        }
        Ok(Self { scaler, model })
    }

    /// Load `air_quality_lstm.json` and `air_quality_scaler_params.json` from `dir`.
    pub fn load(dir: &Path) -> AiResult<Self> {
        let scaler = MinMaxScaler::load(&dir.join(SCALER_PARAMS_FILE))?;
        let model = LstmClassifier::load(&dir.join(WEIGHTS_FILE))?;
        tracing::info!(dir = %dir.display(), "air quality classifier loaded");
        Self::new(scaler, Arc::new(model))
    }

    /// Class probabilities for the readings, rounded to five decimals.
    pub fn classify(&self, readings: &[AirQualityReading]) -> AiResult<Vec<f64>> {
        let window: Vec<Vec<f64>> = complete_window(readings)?
            .iter()
            .map(|row| self.scaler.transform(row).to_vec())
            .collect();

        let logits = self.model.logits(&window)?;
        if logits.len() != CLASSES {
            return Err(AiError::InferenceFailed(format!(
                "expected {CLASSES} logits, got {}",
                logits.len()
            )));
        }
        Ok(softmax(&logits)
            .into_iter()
            .map(|p| round_to(p, PROBABILITY_DECIMALS))
            .collect())
    }
}

/// One classification request over a snapshot of recent readings.
pub struct AirQualityClassificationJob {
    classifier: Arc<AirQualityClassifier>,
    readings: Vec<AirQualityReading>,
}

impl AirQualityClassificationJob {
    pub fn new(classifier: Arc<AirQualityClassifier>, readings: Vec<AirQualityReading>) -> Self {
        Self { classifier, readings }
    }
}

impl AiJob for AirQualityClassificationJob {
    type Input = Vec<AirQualityReading>;
    type Output = Vec<f64>;

    fn name(&self) -> &'static str {
        "air_quality_classification"
    }

    fn input(&self) -> &Self::Input {
        &self.readings
    }

    fn run(&self) -> Result<Vec<f64>, AiError> {
        self.classifier.classify(&self.readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::constant_weights;
    use crate::scaler::ChannelRange;
    use chrono::{Duration, TimeZone, Utc};
    use envwatch_monitoring::{PollutantComponents, RawComponents};
    use indexmap::IndexMap;
    use proptest::prelude::*;

    fn reading(hour: i64, complete: bool) -> AirQualityReading {
        let mut components: RawComponents = PollutantComponents {
            co: 200.0 + hour as f64,
            no: 0.2,
            no2: 10.0,
            o3: 50.0,
            so2: 1.0,
            pm2_5: 5.0,
            pm10: 8.0,
            nh3: 0.5,
        }
        .into();
        if !complete {
            components.o3 = None;
        }
        AirQualityReading {
            observed_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            aqi: Some(2),
            components,
        }
    }

    fn scaler() -> MinMaxScaler {
        let params: IndexMap<String, ChannelRange> = MinMaxScaler::CHANNELS
            .iter()
            .map(|c| (c.to_string(), ChannelRange { min: 0.0, max: 100.0, scale: 0.01 }))
            .collect();
        MinMaxScaler::from_params(&params).unwrap()
    }

    fn classifier(bias: Vec<f64>) -> AirQualityClassifier {
        let model = LstmClassifier::from_weights(constant_weights(9, 3, bias)).unwrap();
        AirQualityClassifier::new(scaler(), Arc::new(model)).unwrap()
    }

    #[test]
    fn uniform_logits_give_uniform_probabilities() {
        let readings: Vec<_> = (0..10).map(|h| reading(h, true)).collect();
        let probs = classifier(vec![0.0; 5]).classify(&readings).unwrap();
        assert_eq!(probs, vec![0.2; 5]);
    }

    #[test]
    fn probabilities_are_rounded_to_five_places() {
        let readings: Vec<_> = (0..10).map(|h| reading(h, true)).collect();
        let probs = classifier(vec![1.0, 2.0, 3.0, 4.0, 5.0]).classify(&readings).unwrap();
        for p in &probs {
            assert_eq!(*p, round_to(*p, 5));
        }
        assert!(probs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn seven_valid_rows_are_incomplete() {
        let readings: Vec<_> = (0..10).map(|h| reading(h, h < 7)).collect();
        let err = classifier(vec![0.0; 5]).classify(&readings).unwrap_err();
        assert!(matches!(err, AiError::DataIncomplete(msg) if msg.contains("only 7")));
    }

    #[test]
    fn window_keeps_the_most_recent_complete_rows() {
        let mut readings: Vec<_> = (0..12).map(|h| reading(h, true)).collect();
        readings[11] = reading(11, false);
        let window = complete_window(&readings).unwrap();
        assert_eq!(window.len(), WINDOW);
        assert_eq!(window[0][1], 201.0);
        assert_eq!(window[9][1], 210.0);
    }

    #[test]
    fn classifier_shape_is_checked() {
        let model = LstmClassifier::from_weights(constant_weights(9, 3, vec![0.0; 4])).unwrap();
        assert!(AirQualityClassifier::new(scaler(), Arc::new(model)).is_err());
    }

    #[test]
    fn softmax_survives_huge_logits() {
        let probs = softmax(&[1000.0, 1000.0, -1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-12);
        assert_eq!(probs[2], 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        /// Property: rounded softmax output is a 5-way distribution.
        #[test]
        fn softmax_is_a_distribution(logits in prop::array::uniform5(-500.0f64..500.0)) {
            let probs: Vec<f64> = softmax(&logits).into_iter().map(|p| round_to(p, 5)).collect();
            prop_assert_eq!(probs.len(), 5);
            prop_assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
            prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-4);
        }
    }
}
