//! OpenWeatherMap air-pollution API.
//!
//! One request, one response: failures are returned to the caller and never
//! retried here. A response without a measurement list, or with an empty one,
//! is [`UpstreamError::Malformed`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use envwatch_monitoring::{AirQualityReading, GeoPoint, RawComponents};

use super::{UpstreamError, truncate_body};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// `main` block of a provider record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AqiBlock {
    pub aqi: Option<u8>,
}

/// One entry of the provider's `list`, kept in the provider's shape so it can be
/// passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirPollutionRecord {
    /// Unix seconds, UTC.
    pub dt: i64,
    pub main: AqiBlock,
    pub components: RawComponents,
}

impl AirPollutionRecord {
    pub fn to_reading(&self) -> Result<AirQualityReading, UpstreamError> {
        let observed_at = DateTime::<Utc>::from_timestamp(self.dt, 0)
            .ok_or_else(|| UpstreamError::Malformed(format!("timestamp {} out of range", self.dt)))?;
        Ok(AirQualityReading {
            observed_at,
            aqi: self.main.aqi,
            components: self.components,
        })
    }
}

impl From<&AirQualityReading> for AirPollutionRecord {
    fn from(reading: &AirQualityReading) -> Self {
        Self {
            dt: reading.observed_at.timestamp(),
            main: AqiBlock { aqi: reading.aqi },
            components: reading.components,
        }
    }
}

/// Readings in chronological order.
pub fn readings(records: &[AirPollutionRecord]) -> Result<Vec<AirQualityReading>, UpstreamError> {
    let mut readings = records
        .iter()
        .map(AirPollutionRecord::to_reading)
        .collect::<Result<Vec<_>, _>>()?;
    readings.sort_by_key(|r| r.observed_at);
    Ok(readings)
}

#[derive(Debug, Deserialize)]
struct PollutionResponse {
    list: Vec<AirPollutionRecord>,
}

#[async_trait]
pub trait PollutantApi: Send + Sync {
    /// Latest reading at `location`.
    async fn current(&self, location: GeoPoint) -> Result<AirPollutionRecord, UpstreamError>;

    /// Hourly readings over `[start, end]`.
    async fn history(
        &self,
        location: GeoPoint,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AirPollutionRecord>, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn fetch_list(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<AirPollutionRecord>, UpstreamError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: PollutionResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        if parsed.list.is_empty() {
            return Err(UpstreamError::Malformed("empty measurement list".to_string()));
        }
        debug!(path, records = parsed.list.len(), "pollutant records fetched");
        Ok(parsed.list)
    }
}

fn coordinates(location: GeoPoint) -> [(&'static str, String); 2] {
    [
        ("lat", location.latitude.to_string()),
        ("lon", location.longitude.to_string()),
    ]
}

#[async_trait]
impl PollutantApi for OpenWeatherClient {
    async fn current(&self, location: GeoPoint) -> Result<AirPollutionRecord, UpstreamError> {
        let list = self.fetch_list("/air_pollution", &coordinates(location)).await?;
        list.into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Malformed("empty measurement list".to_string()))
    }

    async fn history(
        &self,
        location: GeoPoint,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AirPollutionRecord>, UpstreamError> {
        let [lat, lon] = coordinates(location);
        let query = [
            lat,
            lon,
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
        ];
        self.fetch_list("/air_pollution/history", &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_server::scripted;
    use chrono::TimeZone;

    const BODY: &str = r#"{
        "coord": {"lon": 4.85, "lat": 45.75},
        "list": [
            {"dt": 1717200000, "main": {"aqi": 2},
             "components": {"co": 210.3, "no": 0.1, "no2": 8.4, "o3": 61.2, "so2": 1.1, "pm2_5": 4.2, "pm10": 6.0, "nh3": 0.9}},
            {"dt": 1717196400, "main": {"aqi": 3},
             "components": {"co": 220.0, "no2": 9.0}}
        ]
    }"#;

    fn lyon() -> GeoPoint {
        GeoPoint::new(45.75, 4.85)
    }

    #[tokio::test]
    async fn history_sends_window_and_key() {
        let server = scripted(vec![(200, BODY.to_string())]).await;
        let client = OpenWeatherClient::with_base_url("k3y", &server.base_url);
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::hours(10);

        let records = client.history(lyon(), start, end).await.unwrap();
        assert_eq!(records.len(), 2);

        let request = server.requests.lock()[0].clone();
        assert!(request.starts_with("GET /air_pollution/history?"));
        assert!(request.contains("lat=45.75"));
        assert!(request.contains(&format!("start={}", start.timestamp())));
        assert!(request.contains("appid=k3y"));
    }

    #[tokio::test]
    async fn current_takes_the_first_record() {
        let server = scripted(vec![(200, BODY.to_string())]).await;
        let client = OpenWeatherClient::with_base_url("k3y", &server.base_url);

        let record = client.current(lyon()).await.unwrap();
        assert_eq!(record.dt, 1717200000);
        assert_eq!(record.main.aqi, Some(2));
        assert!(server.requests.lock()[0].starts_with("GET /air_pollution?"));
    }

    #[tokio::test]
    async fn empty_or_missing_lists_are_malformed() {
        let server = scripted(vec![(200, r#"{"list": []}"#.to_string()), (200, "{}".to_string())]).await;
        let client = OpenWeatherClient::with_base_url("k3y", &server.base_url);

        assert!(matches!(client.current(lyon()).await, Err(UpstreamError::Malformed(_))));
        assert!(matches!(client.current(lyon()).await, Err(UpstreamError::Malformed(_))));
    }

    #[tokio::test]
    async fn error_statuses_are_reported() {
        let server = scripted(vec![(401, r#"{"cod":401}"#.to_string())]).await;
        let client = OpenWeatherClient::with_base_url("bad", &server.base_url);

        let err = client.current(lyon()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 401, .. }));
    }

    #[test]
    fn readings_are_sorted_and_keep_missing_fields() {
        let parsed: PollutionResponse = serde_json::from_str(BODY).unwrap();
        let readings = readings(&parsed.list).unwrap();
        assert_eq!(readings[0].observed_at.timestamp(), 1717196400);
        assert_eq!(readings[0].components.o3, None);
        assert!(readings[0].feature_row().is_none());
        assert!(readings[1].feature_row().is_some());
    }

    #[test]
    fn records_round_trip_through_readings() {
        let parsed: PollutionResponse = serde_json::from_str(BODY).unwrap();
        let reading = parsed.list[0].to_reading().unwrap();
        assert_eq!(AirPollutionRecord::from(&reading), parsed.list[0]);
    }
}
