use axum::Router;

pub mod air_quality;
pub mod alerts;
pub mod indicators;
pub mod predictions;
pub mod system;
pub mod thresholds;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/aq", air_quality::router())
        .nest("/predict", predictions::router())
        .nest("/indicators", indicators::router())
        .nest("/thresholds", thresholds::router())
        .nest("/alerts", alerts::router())
}
