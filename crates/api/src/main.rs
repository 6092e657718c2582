use std::sync::Arc;

use anyhow::Context;

use envwatch_api::app::{build_app, build_services};
use envwatch_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    envwatch_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(build_services(&config).await.context("startup failed")?);

    let scheduler = services.scheduler(config.schedule_interval).map(|s| s.spawn());
    if scheduler.is_none() {
        tracing::warn!("pollutant provider not configured; scheduled jobs are disabled");
    }

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(handle) = scheduler {
        handle.shutdown().await;
    }
    tracing::info!("shut down");
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
