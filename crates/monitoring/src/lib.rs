//! Environmental monitoring domain.
//!
//! Indicators, alert thresholds, alerts and air-quality measurements, plus the two
//! pure rules the scheduled jobs are built on:
//! - ingestion planning: natural-key deduplication of provider records
//! - threshold evaluation: which active thresholds fire for a reading
//!
//! No IO, no HTTP, no storage.

pub mod alert;
pub mod evaluator;
pub mod indicator;
pub mod measurement;
pub mod threshold;

pub use alert::{Alert, AlertOrigin, NewAlert, Severity};
pub use evaluator::evaluate_thresholds;
pub use indicator::{Indicator, IndicatorCode, seed_indicators};
pub use measurement::{
    AirQualityReading, GeoPoint, IngestionPlan, Measurement, MeasurementKey, Pollutant,
    PollutantComponents, RawComponents, candidate_keys, plan_ingestion,
};
pub use threshold::{AlertThreshold, NewThreshold, ThresholdBook};
