//! One-off backfill of the measurement store from the pollutant history.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;

use envwatch_api::app::Stores;
use envwatch_infra::external::OpenWeatherClient;
use envwatch_infra::ingestion::DEFAULT_HISTORY_DAYS;
use envwatch_infra::{AirQualityIngestion, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "envwatch-import", about = "Backfill air-quality measurements")]
struct Args {
    /// Days of history to import, ending now.
    #[arg(long, default_value_t = DEFAULT_HISTORY_DAYS)]
    days: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    envwatch_observability::init();
    let args = Args::parse();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let api_key = config.require_openweather_key()?.to_string();
    let stores = Stores::from_config(&config).await.context("store initialisation failed")?;

    let ingestion = AirQualityIngestion::new(
        Arc::new(OpenWeatherClient::new(api_key)),
        stores.measurements.clone(),
        config.location,
    );
    let report = ingestion
        .import_history(args.days, Utc::now())
        .await
        .context("history import failed")?;

    tracing::info!(days = args.days, ?report, "history imported");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
