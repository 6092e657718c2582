use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use envwatch_core::AlertId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Alerts are append-only: reads and manual creation, nothing else.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_alerts).post(create_alert))
        .route(
            "/:id",
            get(get_alert)
                .put(alerts_immutable)
                .patch(alerts_immutable)
                .delete(alerts_immutable),
        )
}

/// Newest first.
pub async fn list_alerts(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.stores.alerts.list().await {
        Ok(alerts) => (StatusCode::OK, Json(alerts)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn create_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateAlertRequest>,
) -> axum::response::Response {
    let alert = match body.into_new_alert() {
        Ok(a) => a,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.stores.alerts.append(vec![alert]).await {
        Ok(mut created) => match created.pop() {
            Some(alert) => {
                tracing::info!(alert_id = %alert.id, severity = alert.severity.as_str(), "manual alert raised");
                (StatusCode::CREATED, Json(alert)).into_response()
            }
            None => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "alert was not stored"),
        },
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AlertId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid alert id"),
    };

    match services.stores.alerts.get(id).await {
        Ok(Some(alert)) => (StatusCode::OK, Json(alert)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "alert not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn alerts_immutable() -> axum::response::Response {
    errors::json_error(
        StatusCode::METHOD_NOT_ALLOWED,
        "alerts_immutable",
        "alerts cannot be modified or deleted once raised",
    )
}
