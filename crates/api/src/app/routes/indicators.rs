use std::sync::Arc;

use axum::{Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::get};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/", get(list_indicators))
}

pub async fn list_indicators(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.stores.thresholds.indicators().await {
        Ok(indicators) => (StatusCode::OK, Json(indicators)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
