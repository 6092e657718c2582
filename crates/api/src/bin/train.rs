//! Offline training of the weather forecast models.
//!
//! One model per requested feature at the requested horizon, trained on a year
//! of station history and persisted as the live artifact version.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::task::JoinSet;

use envwatch_ai::ArtifactStore;
use envwatch_infra::AppConfig;
use envwatch_infra::ai::{ForecastService, ModelCache, parse_request};
use envwatch_infra::external::{ClimateAcquisition, MeteoFranceClient};

#[derive(Debug, Parser)]
#[command(name = "envwatch-train", about = "Train and persist weather forecast models")]
struct Args {
    /// Comma-separated feature codes.
    #[arg(long, value_delimiter = ',', default_value = "TX,TN,RR,TM,TAMPLI")]
    features: Vec<String>,

    /// Forecast horizon in days (1-7).
    #[arg(long, default_value_t = 1)]
    days: u32,

    /// Retrain models that already have artifacts.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    envwatch_observability::init();
    let args = Args::parse();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let api_key = config.require_meteofrance_key()?.to_string();
    let climate = ClimateAcquisition::new(Arc::new(MeteoFranceClient::new(api_key)), config.order_polling);
    let service = Arc::new(ForecastService::new(
        Some(climate),
        Arc::new(ModelCache::new(ArtifactStore::new(config.models_dir.clone()))),
        config.station_id.clone(),
    ));

    let mut failures = Vec::new();
    let mut keys = Vec::new();
    for feature in &args.features {
        let code = feature.trim().to_string();
        match parse_request(&code, args.days) {
            Ok((_, key)) if !args.force && service.cache().artifacts().exists(&key) => {
                tracing::info!(model = %key, "artifacts exist, skipping (use --force to retrain)");
            }
            Ok((_, key)) => keys.push(key),
            Err(e) => {
                tracing::error!(feature = %code, error = %e, "invalid feature");
                failures.push(code);
            }
        }
    }

    if !keys.is_empty() {
        let history = service
            .training_history(Utc::now())
            .await
            .context("failed to fetch training history")?;
        tracing::info!(rows = history.len(), models = keys.len(), "training history fetched");

        let mut tasks = JoinSet::new();
        for key in keys {
            let service = service.clone();
            let history = history.clone();
            tasks.spawn(async move {
                let slug = key.slug();
                (slug, service.train_model(key, history).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slug, Ok(trained))) => tracing::info!(
                    model = %slug,
                    test_rmse = trained.metrics.test_rmse,
                    test_mae = trained.metrics.test_mae,
                    test_r2 = trained.metrics.test_r2,
                    "model trained"
                ),
                Ok((slug, Err(e))) => {
                    tracing::error!(model = %slug, error = %e, "training failed");
                    failures.push(slug);
                }
                Err(e) => {
                    tracing::error!(error = %e, "training task panicked");
                    failures.push("<panicked>".to_string());
                }
            }
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("{} model(s) failed: {}", failures.len(), failures.join(", "));
    }
    Ok(())
}
