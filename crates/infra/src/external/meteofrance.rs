//! Météo-France climatological data (DPClim) order API.
//!
//! Data is never returned directly. A request goes through three phases:
//!
//! 1. submit an order for a station and period; the provider answers with an
//!    order id or rejects the request
//! 2. poll the order file: `201` delivers the payload, `204` means still
//!    processing, any other status aborts
//! 3. parse the `;`-separated payload into a [`RawFrame`]
//!
//! Polling is bounded by the [`RetryPolicy`] built from [`OrderPolling`]: after
//! `max_retries` "still processing" answers the download ends with
//! [`UpstreamError::TimedOut`]. The caller decides whether to try again later.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info, warn};

use envwatch_ai::RawFrame;

use super::climate_csv::parse_climate_csv;
use super::{UpstreamError, truncate_body};
use crate::config::OrderPolling;
use crate::jobs::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://public-api.meteofrance.fr/public/DPClim/v1";

/// The provider publishes daily data with a lag; windows end this many days ago.
pub const PROVIDER_LAG_DAYS: i64 = 2;

const PERIOD_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Answer to one poll of an order file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderFile {
    Ready(String),
    Processing,
}

#[async_trait]
pub trait ClimateOrderApi: Send + Sync {
    /// Order daily data for `station_id` over `[start, end]`; returns the order id.
    async fn submit_order(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<String, UpstreamError>;

    async fn fetch_order_file(&self, order_id: &str) -> Result<OrderFile, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct MeteoFranceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MeteoFranceClient {
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
}

#[async_trait]
impl ClimateOrderApi for MeteoFranceClient {
    async fn submit_order(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<String, UpstreamError> {
        let response = self
            .http
            .get(format!("{}/commande-station/quotidienne", self.base_url))
            .header("apikey", &self.api_key)
            .query(&[
                ("id-station", station_id.to_string()),
                ("date-deb-periode", start.format(PERIOD_FORMAT).to_string()),
                ("date-fin-periode", end.format(PERIOD_FORMAT).to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::ACCEPTED {
            return Err(UpstreamError::Rejected(format!(
                "status {}: {}",
                status.as_u16(),
                truncate_body(&body)
            )));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        match json.pointer("/elaboreProduitAvecDemandeResponse/return") {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(UpstreamError::Malformed(format!(
                "order response without an order id: {}",
                truncate_body(&body)
            ))),
        }
    }

    async fn fetch_order_file(&self, order_id: &str) -> Result<OrderFile, UpstreamError> {
        let response = self
            .http
            .get(format!("{}/commande/fichier", self.base_url))
            .header("apikey", &self.api_key)
            .query(&[("id-cmde", order_id)])
            .send()
            .await?;

        match response.status().as_u16() {
            201 => Ok(OrderFile::Ready(response.text().await?)),
            204 => Ok(OrderFile::Processing),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(UpstreamError::Failed {
                    order_id: order_id.to_string(),
                    reason: format!("status {status}: {}", truncate_body(&body)),
                })
            }
        }
    }
}

/// Order/poll/parse driver over any [`ClimateOrderApi`].
#[derive(Clone)]
pub struct ClimateAcquisition {
    api: Arc<dyn ClimateOrderApi>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ClimateAcquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClimateAcquisition").field("policy", &self.policy).finish()
    }
}

impl ClimateAcquisition {
    pub fn new(api: Arc<dyn ClimateOrderApi>, polling: OrderPolling) -> Self {
        Self {
            api,
            policy: RetryPolicy::fixed(polling.max_retries, polling.retry_delay),
        }
    }

    /// Poll `order_id` until its file is ready.
    ///
    /// Makes at most `max_retries` requests and sleeps the fixed delay between
    /// them, never after the last one.
    pub async fn download(&self, order_id: &str) -> Result<String, UpstreamError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.api.fetch_order_file(order_id).await? {
                OrderFile::Ready(payload) => {
                    debug!(order_id, attempt, bytes = payload.len(), "climate order ready");
                    return Ok(payload);
                }
                OrderFile::Processing => {
                    if !self.policy.should_retry(attempt) {
                        warn!(order_id, attempts = attempt, "climate order still processing, giving up");
                        return Err(UpstreamError::TimedOut {
                            order_id: order_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    debug!(order_id, attempt, max = self.policy.max_attempts, "climate order still processing");
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }

    /// Submit, poll and parse daily data for `[start, end]`.
    pub async fn daily_data(
        &self,
        station_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawFrame, UpstreamError> {
        let order_id = self.api.submit_order(station_id, start, end).await?;
        info!(station_id, order_id = %order_id, %start, %end, "climate order submitted");
        let payload = self.download(&order_id).await?;
        parse_climate_csv(&payload)
    }

    /// The `days_back` days ending [`PROVIDER_LAG_DAYS`] before `now`.
    pub async fn recent_data(
        &self,
        station_id: &str,
        days_back: u32,
        now: DateTime<Utc>,
    ) -> Result<RawFrame, UpstreamError> {
        let end = now - Duration::days(PROVIDER_LAG_DAYS);
        let start = end - Duration::days(i64::from(days_back));
        self.daily_data(station_id, start, end).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::external::test_server::scripted;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration as StdDuration;

    /// Scripted order API: hands out `order-1` and answers polls from a queue,
    /// repeating `Processing` once the queue is empty.
    #[derive(Default)]
    pub(crate) struct FakeOrderApi {
        pub polls: Mutex<VecDeque<Result<OrderFile, UpstreamError>>>,
        pub poll_count: Mutex<u32>,
        pub orders: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
        pub reject: bool,
    }

    impl FakeOrderApi {
        pub(crate) fn ready_with(payload: &str) -> Self {
            let api = Self::default();
            api.polls.lock().push_back(Ok(OrderFile::Ready(payload.to_string())));
            api
        }
    }

    #[async_trait]
    impl ClimateOrderApi for FakeOrderApi {
        async fn submit_order(
            &self,
            station_id: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<String, UpstreamError> {
            if self.reject {
                return Err(UpstreamError::Rejected("status 400: bad station".to_string()));
            }
            self.orders.lock().push((station_id.to_string(), start, end));
            Ok("order-1".to_string())
        }

        async fn fetch_order_file(&self, _order_id: &str) -> Result<OrderFile, UpstreamError> {
            *self.poll_count.lock() += 1;
            self.polls.lock().pop_front().unwrap_or(Ok(OrderFile::Processing))
        }
    }

    fn polling(max_retries: u32) -> OrderPolling {
        OrderPolling {
            max_retries,
            retry_delay: StdDuration::ZERO,
        }
    }

    #[tokio::test]
    async fn always_processing_times_out_after_exactly_max_retries() {
        let api = Arc::new(FakeOrderApi::default());
        let acquisition = ClimateAcquisition::new(api.clone(), polling(5));

        let err = acquisition.download("order-1").await.unwrap_err();
        assert!(matches!(err, UpstreamError::TimedOut { attempts: 5, .. }));
        assert_eq!(*api.poll_count.lock(), 5);
    }

    #[tokio::test]
    async fn ready_after_processing_returns_the_payload() {
        let api = Arc::new(FakeOrderApi::default());
        {
            let mut polls = api.polls.lock();
            polls.push_back(Ok(OrderFile::Processing));
            polls.push_back(Ok(OrderFile::Processing));
            polls.push_back(Ok(OrderFile::Ready("DATE;TX\n20240101;5\n".to_string())));
        }
        let acquisition = ClimateAcquisition::new(api.clone(), polling(5));

        assert_eq!(acquisition.download("order-1").await.unwrap(), "DATE;TX\n20240101;5\n");
        assert_eq!(*api.poll_count.lock(), 3);
    }

    #[tokio::test]
    async fn an_error_status_stops_polling() {
        let api = Arc::new(FakeOrderApi::default());
        api.polls.lock().push_back(Err(UpstreamError::Failed {
            order_id: "order-1".to_string(),
            reason: "status 500".to_string(),
        }));
        let acquisition = ClimateAcquisition::new(api.clone(), polling(5));

        assert!(matches!(acquisition.download("order-1").await, Err(UpstreamError::Failed { .. })));
        assert_eq!(*api.poll_count.lock(), 1);
    }

    #[tokio::test]
    async fn rejected_orders_are_never_polled() {
        let api = Arc::new(FakeOrderApi {
            reject: true,
            ..FakeOrderApi::default()
        });
        let acquisition = ClimateAcquisition::new(api.clone(), polling(5));
        let now = Utc::now();

        let err = acquisition.recent_data("69123002", 30, now).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected(_)));
        assert_eq!(*api.poll_count.lock(), 0);
    }

    #[tokio::test]
    async fn recent_data_orders_a_lagged_window() {
        let api = Arc::new(FakeOrderApi::ready_with("POSTE;DATE;TX\n1;20240301;12,5\n1;20240302;13\n"));
        let acquisition = ClimateAcquisition::new(api.clone(), polling(5));
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

        let frame = acquisition.recent_data("69123002", 30, now).await.unwrap();
        assert_eq!(frame.len(), 2);

        let (station, start, end) = api.orders.lock()[0].clone();
        assert_eq!(station, "69123002");
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 2, 7, 12, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn client_maps_order_statuses() {
        let server = scripted(vec![
            (202, r#"{"elaboreProduitAvecDemandeResponse":{"return":"2024123"}}"#.to_string()),
            (204, String::new()),
            (201, "DATE;TX\n20240101;5\n".to_string()),
            (404, "unknown order".to_string()),
        ])
        .await;
        let client = MeteoFranceClient::with_base_url("s3cret", &server.base_url);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let id = client.submit_order("69123002", start, start + Duration::days(30)).await.unwrap();
        assert_eq!(id, "2024123");
        assert_eq!(client.fetch_order_file(&id).await.unwrap(), OrderFile::Processing);
        assert_eq!(
            client.fetch_order_file(&id).await.unwrap(),
            OrderFile::Ready("DATE;TX\n20240101;5\n".to_string())
        );
        assert!(matches!(client.fetch_order_file(&id).await, Err(UpstreamError::Failed { .. })));

        let requests = server.requests.lock();
        assert!(requests[0].starts_with("GET /commande-station/quotidienne?id-station=69123002"));
        assert!(requests[0].to_ascii_lowercase().contains("apikey: s3cret"));
        assert!(requests[1].starts_with("GET /commande/fichier?id-cmde=2024123"));
    }

    #[tokio::test]
    async fn client_rejects_orders_without_an_id() {
        let server = scripted(vec![(202, r#"{"unexpected":true}"#.to_string()), (400, "bad station".to_string())]).await;
        let client = MeteoFranceClient::with_base_url("s3cret", &server.base_url);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(matches!(
            client.submit_order("69123002", start, start).await,
            Err(UpstreamError::Malformed(_))
        ));
        assert!(matches!(
            client.submit_order("69123002", start, start).await,
            Err(UpstreamError::Rejected(_))
        ));
    }
}
