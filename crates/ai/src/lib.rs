//! `envwatch-ai`
//!
//! **Responsibility:** model computations of the monitoring engine.
//!
//! - daily climate forecasting: feature construction, gradient-boosted
//!   regression, evaluation, versioned artifact persistence
//! - air-quality classification: fixed-window LSTM inference over readings
//!
//! This crate does no network or database I/O. Inputs are snapshots handed in by
//! callers (infra services); outputs are values, never domain mutations.

pub mod air_quality;
pub mod artifacts;
pub mod classifier;
pub mod features;
pub mod forecast;
pub mod frame;
pub mod gbm;
pub mod job;
pub mod metrics;
pub mod result;
pub mod scaler;

pub use air_quality::{AirQualityClassificationJob, AirQualityClassifier, softmax};
pub use artifacts::ArtifactStore;
pub use classifier::{LstmClassifier, LstmWeights, SequenceClassifier};
pub use features::FeatureSpec;
pub use forecast::{
    ForecastModel, ForecastTrainingJob, MAX_HORIZON_DAYS, ModelKey, TrainedForecast, TrainingConfig,
    WeatherFeature,
};
pub use frame::{DailyFrame, RawFrame};
pub use gbm::{BoostingParams, GradientBoostedRegressor};
pub use job::AiJob;
pub use metrics::RegressionMetrics;
pub use result::{AiError, AiResult};
pub use scaler::{ChannelRange, MinMaxScaler, StandardScaler};
