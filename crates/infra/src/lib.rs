//! Infrastructure layer: configuration, provider clients, stores, scheduled jobs
//! and model-serving services.

pub mod ai;
pub mod alerting;
pub mod config;
pub mod external;
pub mod ingestion;
pub mod jobs;
pub mod store;

pub use alerting::{AlertingError, CheckAlertsJob, ThresholdChecker};
pub use config::{AppConfig, ConfigError, OrderPolling};
pub use ingestion::{AirQualityIngestion, FetchLatestAirJob, IngestionError, IngestionPipeline, IngestionReport};
