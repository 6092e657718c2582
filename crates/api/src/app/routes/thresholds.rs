use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use envwatch_core::ThresholdId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_thresholds).post(create_threshold))
        .route("/:id", get(get_threshold).delete(delete_threshold))
}

fn parse_id(id: &str) -> Result<ThresholdId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid threshold id"))
}

/// Active thresholds only.
pub async fn list_thresholds(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.stores.thresholds.active_thresholds().await {
        Ok(thresholds) => (StatusCode::OK, Json(thresholds)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Creates the indicator's active threshold; the previous one is deactivated.
pub async fn create_threshold(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateThresholdRequest>,
) -> axum::response::Response {
    let request = match body.into_new_threshold() {
        Ok(r) => r,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.stores.thresholds.create_threshold(request).await {
        Ok(threshold) => {
            tracing::info!(threshold_id = %threshold.id, indicator = %threshold.indicator, value = threshold.threshold_value, "threshold created");
            (StatusCode::CREATED, Json(threshold)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Inactive thresholds are hidden.
pub async fn get_threshold(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.stores.thresholds.threshold(id).await {
        Ok(Some(threshold)) if threshold.active => (StatusCode::OK, Json(threshold)).into_response(),
        Ok(_) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "threshold not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Soft delete.
pub async fn delete_threshold(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.stores.thresholds.threshold(id).await {
        Ok(Some(threshold)) if threshold.active => {}
        Ok(_) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "threshold not found"),
        Err(e) => return errors::store_error_to_response(e),
    }

    match services.stores.thresholds.deactivate_threshold(id).await {
        Ok(_) => {
            tracing::info!(threshold_id = %id, "threshold deactivated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
