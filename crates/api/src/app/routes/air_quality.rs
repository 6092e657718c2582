use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{Duration, Utc};

use crate::app::dto::MeasurementView;
use crate::app::errors;
use crate::app::services::AppServices;

/// Days of stored measurements served by `/aq/last-month`.
pub const LAST_MONTH_DAYS: i64 = 31;

pub fn router() -> Router {
    Router::new()
        .route("/last-10h", get(last_10_hours))
        .route("/last-month", get(last_month))
}

/// Provider records of the last ten hours, unchanged.
pub async fn last_10_hours(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.air_quality.last_hours(Utc::now()).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "last-10h fetch failed");
            errors::air_quality_error_to_response(e)
        }
    }
}

pub async fn last_month(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let from = Utc::now() - Duration::days(LAST_MONTH_DAYS);
    match services.stores.measurements.since(from).await {
        Ok(rows) => {
            let body: Vec<MeasurementView> = rows.iter().map(MeasurementView::from).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
