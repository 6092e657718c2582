//! Model-serving services.
//!
//! These wire the pure models of `envwatch-ai` to the providers and the artifact
//! directory. Failures are returned as [`ForecastError`] for the HTTP layer to
//! turn into `success: false` envelopes.

pub mod air_quality_service;
pub mod forecast_service;
pub mod model_cache;

use thiserror::Error;

use envwatch_ai::AiError;

use crate::config::ConfigError;
use crate::external::UpstreamError;

pub use air_quality_service::AirQualityService;
pub use forecast_service::{
    FORECAST_WINDOW_DAYS, FeatureForecast, ForecastContext, ForecastService, ModelInfo, TRAINING_WINDOW_DAYS,
    WeatherForecast, WeatherPrediction, parse_request, prediction_date,
};
pub use model_cache::ModelCache;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// Bad request parameters.
    #[error("{0}")]
    Validation(String),

    /// Missing provider credential.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Ai(#[from] AiError),

    /// The recent window is too short to fill every lag and rolling feature.
    #[error("no prediction available: not enough recent history")]
    NoPrediction,
}
