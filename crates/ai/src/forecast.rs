//! Daily climate regression: train, evaluate and predict one (target, horizon) model.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::features::{self, DEFAULT_TEST_FRACTION, FeatureSpec};
use crate::frame::RawFrame;
use crate::gbm::{BoostingParams, GradientBoostedRegressor};
use crate::job::AiJob;
use crate::metrics::{RegressionMetrics, mae, r2, rmse};
use crate::result::{AiError, AiResult};
use crate::scaler::StandardScaler;

/// Longest supported forecast horizon, in days.
pub const MAX_HORIZON_DAYS: u32 = 7;

/// Daily climate variables a forecast can target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WeatherFeature {
    /// Daily maximum temperature.
    Tx,
    /// Daily minimum temperature.
    Tn,
    /// Daily precipitation.
    Rr,
    /// Daily mean temperature.
    Tm,
    /// Daily temperature amplitude.
    Tampli,
}

impl WeatherFeature {
    pub const ALL: [WeatherFeature; 5] = [
        WeatherFeature::Tx,
        WeatherFeature::Tn,
        WeatherFeature::Rr,
        WeatherFeature::Tm,
        WeatherFeature::Tampli,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            WeatherFeature::Tx => "TX",
            WeatherFeature::Tn => "TN",
            WeatherFeature::Rr => "RR",
            WeatherFeature::Tm => "TM",
            WeatherFeature::Tampli => "TAMPLI",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.code() == code.trim())
    }

    pub fn label(&self) -> &'static str {
        match self {
            WeatherFeature::Tx => "Maximum Temperature",
            WeatherFeature::Tn => "Minimum Temperature",
            WeatherFeature::Rr => "Precipitation",
            WeatherFeature::Tm => "Average Temperature",
            WeatherFeature::Tampli => "Temperature Amplitude",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            WeatherFeature::Rr => "mm",
            _ => "°C",
        }
    }
}

impl core::fmt::Display for WeatherFeature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// Identity of a model: target column and horizon in days.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    target: String,
    horizon: u32,
}

impl ModelKey {
    /// `target` must be a plain column name (it becomes part of an artifact path).
    pub fn new(target: impl Into<String>, horizon: u32) -> AiResult<Self> {
        let target = target.into();
        if target.is_empty() || !target.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AiError::InvalidInput(format!("invalid target column {target:?}")));
        }
        if horizon == 0 {
            return Err(AiError::InvalidInput("horizon must be at least 1 day".to_string()));
        }
        Ok(Self { target, horizon })
    }

    pub fn for_feature(feature: WeatherFeature, horizon: u32) -> AiResult<Self> {
        if horizon > MAX_HORIZON_DAYS {
            return Err(AiError::InvalidInput(format!(
                "days must be between 1 and {MAX_HORIZON_DAYS}"
            )));
        }
        Self::new(feature.code(), horizon)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn horizon(&self) -> u32 {
        self.horizon
    }

    /// Directory name of the key under the artifact root (`TX_1day`).
    pub fn slug(&self) -> String {
        format!("{}_{}day", self.target, self.horizon)
    }
}

impl core::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}d", self.target, self.horizon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub boosting: BoostingParams,
    pub test_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            boosting: BoostingParams::default(),
            test_fraction: DEFAULT_TEST_FRACTION,
        }
    }
}

/// A fitted regressor with the scaler and feature order it was trained with.
///
/// The three always travel together; see [`crate::artifacts::ArtifactStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastModel {
    pub key: ModelKey,
    pub spec: FeatureSpec,
    pub regressor: GradientBoostedRegressor,
    pub scaler: StandardScaler,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedForecast {
    pub model: ForecastModel,
    pub metrics: RegressionMetrics,
}

impl ForecastModel {
    /// Build features, split chronologically, fit on the scaled training rows and
    /// evaluate on both splits.
    pub fn train(raw: &RawFrame, key: &ModelKey, spec: &FeatureSpec, config: &TrainingConfig) -> AiResult<TrainedForecast> {
        if spec.target != key.target {
            return Err(AiError::InvalidInput(format!(
                "feature spec targets {} but key is {key}",
                spec.target
            )));
        }

        let frame = features::build_features(raw, spec)?;
        let set = features::supervised(&frame, &spec.target, key.horizon as usize)?;
        let (train, test) = set.split_chronological(config.test_fraction)?;

        let scaler = StandardScaler::fit(&train.rows)?;
        let train_x = scaler.transform(&train.rows)?;
        let test_x = scaler.transform(&test.rows)?;

        let started = Instant::now();
        let regressor = GradientBoostedRegressor::fit(&train_x, &train.targets, &config.boosting)?;
        let training_time = started.elapsed().as_secs_f64();

        let train_pred = regressor.predict(&train_x)?;
        let test_pred = regressor.predict(&test_x)?;
        let metrics = RegressionMetrics {
            train_rmse: rmse(&train.targets, &train_pred),
            test_rmse: rmse(&test.targets, &test_pred),
            train_mae: mae(&train.targets, &train_pred),
            test_mae: mae(&test.targets, &test_pred),
            train_r2: r2(&train.targets, &train_pred),
            test_r2: r2(&test.targets, &test_pred),
            training_time,
        };

        tracing::info!(
            model = %key,
            rows = set.len(),
            features = set.feature_names.len(),
            test_rmse = metrics.test_rmse,
            test_r2 = metrics.test_r2,
            training_time,
            "forecast model trained"
        );

        Ok(TrainedForecast {
            model: ForecastModel {
                key: key.clone(),
                spec: spec.clone(),
                regressor,
                scaler,
                feature_names: set.feature_names,
            },
            metrics,
        })
    }

    /// Predict from a recent raw window.
    ///
    /// Re-runs feature construction without the target shift and uses the last
    /// complete row. `Ok(None)` when the window is too short to fill every lag and
    /// rolling column.
    pub fn predict(&self, raw: &RawFrame) -> AiResult<Option<f64>> {
        let frame = features::build_features(raw, &self.spec)?;

        let missing: Vec<String> = self
            .feature_names
            .iter()
            .filter(|f| !frame.has_column(f))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AiError::MissingFeatures(missing));
        }

        let Some(&last) = frame.complete_rows().last() else {
            return Ok(None);
        };

        let row = self
            .feature_names
            .iter()
            .map(|name| {
                frame
                    .column(name)
                    .and_then(|values| values[last])
                    .ok_or_else(|| AiError::MissingFeatures(vec![name.clone()]))
            })
            .collect::<AiResult<Vec<f64>>>()?;

        let scaled = self.scaler.transform_row(&row)?;
        self.regressor.predict_row(&scaled).map(Some)
    }
}

/// Training run for one model key on a raw history window.
#[derive(Debug, Clone)]
pub struct ForecastTrainingJob {
    key: ModelKey,
    spec: FeatureSpec,
    config: TrainingConfig,
    history: RawFrame,
}

impl ForecastTrainingJob {
    pub fn new(key: ModelKey, history: RawFrame) -> Self {
        Self {
            spec: FeatureSpec::new(key.target()),
            key,
            config: TrainingConfig::default(),
            history,
        }
    }

    pub fn with_spec(mut self, spec: FeatureSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_config(mut self, config: TrainingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key(&self) -> &ModelKey {
        &self.key
    }
}

impl AiJob for ForecastTrainingJob {
    type Input = RawFrame;
    type Output = TrainedForecast;

    fn name(&self) -> &'static str {
        "forecast_training"
    }

    fn input(&self) -> &Self::Input {
        &self.history
    }

    fn run(&self) -> Result<TrainedForecast, AiError> {
        ForecastModel::train(&self.history, &self.key, &self.spec, &self.config)
    }
}
