use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use envwatch_ai::{AiError, AirQualityClassifier, ArtifactStore};
use envwatch_infra::ai::{AirQualityService, ForecastService, ModelCache};
use envwatch_infra::external::{
    ClimateAcquisition, ClimateOrderApi, MeteoFranceClient, OpenWeatherClient, PollutantApi,
};
use envwatch_infra::jobs::PeriodicScheduler;
use envwatch_infra::store::{
    AlertStore, InMemoryAlertStore, InMemoryMeasurementStore, MeasurementStore, PostgresAlertStore,
    PostgresMeasurementStore, StoreError, ThresholdStore, postgres,
};
use envwatch_infra::{AirQualityIngestion, AppConfig, CheckAlertsJob, FetchLatestAirJob, ThresholdChecker};

/// Why the process could not start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store initialisation failed: {0}")]
    Store(#[from] StoreError),

    #[error("classifier could not be loaded: {0}")]
    Classifier(#[from] AiError),
}

/// Provider clients; `None` where the credential is not configured.
#[derive(Clone, Default)]
pub struct Providers {
    pub pollutants: Option<Arc<dyn PollutantApi>>,
    pub climate: Option<Arc<dyn ClimateOrderApi>>,
}

impl Providers {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.openweather_api_key.is_none() {
            tracing::warn!("OPENWEATHERMAP_API_KEY not set; air-quality endpoints and jobs are disabled");
        }
        if config.meteofrance_api_key.is_none() {
            tracing::warn!("METEOFRANCE_API_KEY not set; weather predictions will fail");
        }
        Self {
            pollutants: config
                .openweather_api_key
                .as_ref()
                .map(|key| Arc::new(OpenWeatherClient::new(key.clone())) as Arc<dyn PollutantApi>),
            climate: config
                .meteofrance_api_key
                .as_ref()
                .map(|key| Arc::new(MeteoFranceClient::new(key.clone())) as Arc<dyn ClimateOrderApi>),
        }
    }
}

#[derive(Clone)]
pub struct Stores {
    pub measurements: Arc<dyn MeasurementStore>,
    pub thresholds: Arc<dyn ThresholdStore>,
    pub alerts: Arc<dyn AlertStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let alerts = Arc::new(InMemoryAlertStore::new());
        Self {
            measurements: Arc::new(InMemoryMeasurementStore::new()),
            thresholds: alerts.clone(),
            alerts,
        }
    }

    /// Connect, create the schema if needed and seed the indicators.
    pub async fn postgres(database_url: &str) -> Result<Self, StoreError> {
        let pool = postgres::connect(database_url).await?;
        postgres::ensure_schema(&pool).await?;
        let alerts = Arc::new(PostgresAlertStore::new(pool.clone()));
        Ok(Self {
            measurements: Arc::new(PostgresMeasurementStore::new(pool)),
            thresholds: alerts.clone(),
            alerts,
        })
    }

    /// Postgres when a database URL is configured, in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        match &config.database_url {
            Some(url) => {
                tracing::info!("using persistent stores");
                Self::postgres(url).await
            }
            None => {
                tracing::info!("using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }
}

/// Everything the handlers and the scheduled jobs need.
pub struct AppServices {
    pub stores: Stores,
    pub air_quality: AirQualityService,
    pub forecasts: ForecastService,
    ingestion: Option<AirQualityIngestion>,
    checker: Option<ThresholdChecker>,
}

impl AppServices {
    pub fn new(
        config: &AppConfig,
        providers: Providers,
        stores: Stores,
        classifier: Arc<AirQualityClassifier>,
    ) -> Self {
        let location = config.location;
        let ingestion = providers
            .pollutants
            .clone()
            .map(|api| AirQualityIngestion::new(api, stores.measurements.clone(), location));
        let checker = providers.pollutants.clone().map(|api| {
            ThresholdChecker::new(api, stores.thresholds.clone(), stores.alerts.clone(), location)
        });

        let climate = providers
            .climate
            .map(|api| ClimateAcquisition::new(api, config.order_polling));
        let cache = Arc::new(ModelCache::new(ArtifactStore::new(config.models_dir.clone())));

        Self {
            air_quality: AirQualityService::new(providers.pollutants, classifier, location),
            forecasts: ForecastService::new(climate, cache, config.station_id.clone()),
            stores,
            ingestion,
            checker,
        }
    }

    /// The hourly `fetch_latest_air` then `check_alerts` schedule, when the
    /// pollutant provider is configured.
    pub fn scheduler(&self, interval: Duration) -> Option<PeriodicScheduler> {
        let (ingestion, checker) = (self.ingestion.clone()?, self.checker.clone()?);
        Some(
            PeriodicScheduler::new("hourly", interval)
                .with_job(Arc::new(FetchLatestAirJob::new(ingestion)))
                .with_job(Arc::new(CheckAlertsJob::new(checker))),
        )
    }
}

/// Production wiring: real providers, configured stores and the classifier
/// loaded from disk.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    let classifier = Arc::new(AirQualityClassifier::load(&config.classifier_dir)?);
    let stores = Stores::from_config(config).await?;
    Ok(AppServices::new(config, Providers::from_config(config), stores, classifier))
}
