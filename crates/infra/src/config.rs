//! Process configuration read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use envwatch_monitoring::GeoPoint;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting (usually a credential) is not configured.
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

pub const DEFAULT_LATITUDE: f64 = 45.75;
pub const DEFAULT_LONGITUDE: f64 = 4.85;
pub const DEFAULT_STATION_ID: &str = "69123002";

/// Bounds of the climate order/poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPolling {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for OrderPolling {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub openweather_api_key: Option<String>,
    pub meteofrance_api_key: Option<String>,
    pub location: GeoPoint,
    pub station_id: String,
    pub models_dir: PathBuf,
    pub classifier_dir: PathBuf,
    pub bind_addr: String,
    pub schedule_interval: Duration,
    pub order_polling: OrderPolling,
    /// `Some` when `USE_PERSISTENT_STORES=true`.
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openweather_api_key: None,
            meteofrance_api_key: None,
            location: GeoPoint::new(DEFAULT_LATITUDE, DEFAULT_LONGITUDE),
            station_id: DEFAULT_STATION_ID.to_string(),
            models_dir: PathBuf::from("models/weather"),
            classifier_dir: PathBuf::from("models/air_quality"),
            bind_addr: "0.0.0.0:8080".to_string(),
            schedule_interval: Duration::from_secs(3600),
            order_polling: OrderPolling::default(),
            database_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset and blank variables take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let use_persistent = parse_or(get("USE_PERSISTENT_STORES"), "USE_PERSISTENT_STORES", false)?;
        let database_url = if use_persistent {
            Some(get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?)
        } else {
            None
        };

        let latitude = parse_or(get("ENVWATCH_LAT"), "ENVWATCH_LAT", defaults.location.latitude)?;
        let longitude = parse_or(get("ENVWATCH_LON"), "ENVWATCH_LON", defaults.location.longitude)?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(invalid("ENVWATCH_LAT", latitude.to_string(), "must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(invalid("ENVWATCH_LON", longitude.to_string(), "must be within [-180, 180]"));
        }

        let schedule_secs: u64 = parse_or(get("ENVWATCH_SCHEDULE_SECS"), "ENVWATCH_SCHEDULE_SECS", 3600)?;
        if schedule_secs == 0 {
            return Err(invalid("ENVWATCH_SCHEDULE_SECS", "0".to_string(), "must be positive"));
        }

        let max_retries = parse_or(
            get("ENVWATCH_ORDER_MAX_RETRIES"),
            "ENVWATCH_ORDER_MAX_RETRIES",
            defaults.order_polling.max_retries,
        )?;
        if max_retries == 0 {
            return Err(invalid("ENVWATCH_ORDER_MAX_RETRIES", "0".to_string(), "must be positive"));
        }
        let retry_delay_secs: u64 = parse_or(
            get("ENVWATCH_ORDER_RETRY_DELAY_SECS"),
            "ENVWATCH_ORDER_RETRY_DELAY_SECS",
            defaults.order_polling.retry_delay.as_secs(),
        )?;

        Ok(Self {
            openweather_api_key: get("OPENWEATHERMAP_API_KEY"),
            meteofrance_api_key: get("METEOFRANCE_API_KEY"),
            location: GeoPoint::new(latitude, longitude),
            station_id: get("ENVWATCH_STATION_ID").unwrap_or(defaults.station_id),
            models_dir: get("ENVWATCH_MODELS_DIR").map(PathBuf::from).unwrap_or(defaults.models_dir),
            classifier_dir: get("ENVWATCH_CLASSIFIER_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.classifier_dir),
            bind_addr: get("ENVWATCH_BIND_ADDR").unwrap_or(defaults.bind_addr),
            schedule_interval: Duration::from_secs(schedule_secs),
            order_polling: OrderPolling {
                max_retries,
                retry_delay: Duration::from_secs(retry_delay_secs),
            },
            database_url,
        })
    }

    pub fn require_openweather_key(&self) -> Result<&str, ConfigError> {
        self.openweather_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("OPENWEATHERMAP_API_KEY"))
    }

    pub fn require_meteofrance_key(&self) -> Result<&str, ConfigError> {
        self.meteofrance_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("METEOFRANCE_API_KEY"))
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e: T::Err| invalid(name, value.clone(), e.to_string())),
    }
}

fn invalid(name: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.order_polling.max_retries, 5);
        assert_eq!(cfg.order_polling.retry_delay, Duration::from_secs(10));
        assert!(cfg.require_meteofrance_key().is_err());
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let cfg = config(&[
            ("METEOFRANCE_API_KEY", " secret "),
            ("ENVWATCH_LAT", "48.85"),
            ("ENVWATCH_SCHEDULE_SECS", "60"),
            ("ENVWATCH_ORDER_RETRY_DELAY_SECS", "0"),
            ("ENVWATCH_STATION_ID", "75114001"),
        ])
        .unwrap();
        assert_eq!(cfg.require_meteofrance_key().unwrap(), "secret");
        assert_eq!(cfg.location.latitude, 48.85);
        assert_eq!(cfg.schedule_interval, Duration::from_secs(60));
        assert_eq!(cfg.order_polling.retry_delay, Duration::ZERO);
        assert_eq!(cfg.station_id, "75114001");
    }

    #[test]
    fn malformed_numbers_are_invalid() {
        let err = config(&[("ENVWATCH_SCHEDULE_SECS", "hourly")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ENVWATCH_SCHEDULE_SECS", .. }));

        let err = config(&[("ENVWATCH_LAT", "123")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ENVWATCH_LAT", .. }));
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));

        let cfg = config(&[("USE_PERSISTENT_STORES", "true"), ("DATABASE_URL", "postgres://localhost/envwatch")]).unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/envwatch"));
    }
}
