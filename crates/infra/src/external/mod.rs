//! External data provider clients.
//!
//! - [`openweather`]: synchronous pollutant API (current reading, hourly history)
//! - [`meteofrance`]: asynchronous climate order API (submit, poll, download)
//! - [`climate_csv`]: parsing of the climate provider's `;`-separated payload
//!
//! Each provider sits behind an `async_trait` seam so services and jobs can be
//! exercised with in-process fakes.

pub mod climate_csv;
pub mod meteofrance;
pub mod openweather;

use thiserror::Error;

pub use climate_csv::parse_climate_csv;
pub use meteofrance::{ClimateAcquisition, ClimateOrderApi, MeteoFranceClient, OrderFile};
pub use openweather::{AirPollutionRecord, OpenWeatherClient, PollutantApi};

/// Failure talking to an external provider.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Connection, TLS or body-read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unexpected HTTP status.
    #[error("provider answered {status}: {body}")]
    Status { status: u16, body: String },

    /// Body could not be decoded, or lacks the expected fields.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The climate provider refused the order.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// The order never became ready within the polling bound.
    #[error("order {order_id} still processing after {attempts} attempts")]
    TimedOut { order_id: String, attempts: u32 },

    /// Polling stopped on an error status.
    #[error("order {order_id} failed: {reason}")]
    Failed { order_id: String, reason: String },
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::Malformed(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

/// Provider bodies can be large; error messages keep the head only.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 512;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
