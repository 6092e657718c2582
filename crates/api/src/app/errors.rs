use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use envwatch_ai::AiError;
use envwatch_core::DomainError;
use envwatch_infra::ai::ForecastError;
use envwatch_infra::store::StoreError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Domain(e) => domain_error_to_response(e),
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
    }
}

/// Status of a failed prediction: 500 for a missing credential or a broken
/// artifact directory, 400 for everything the caller or the data can cause.
pub fn forecast_status(err: &ForecastError) -> StatusCode {
    match err {
        ForecastError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ForecastError::Ai(AiError::Artifact(_) | AiError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        ForecastError::Validation(_)
        | ForecastError::Upstream(_)
        | ForecastError::Ai(_)
        | ForecastError::NoPrediction => StatusCode::BAD_REQUEST,
    }
}

/// `{success: false, error, prediction: null, context: null}`.
pub fn forecast_failure(err: &ForecastError) -> serde_json::Value {
    json!({
        "success": false,
        "error": err.to_string(),
        "prediction": null,
        "context": null,
    })
}

/// Air-quality endpoints answer every failure with 400 and `{error}`.
pub fn air_quality_error_to_response(err: ForecastError) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, axum::Json(json!({ "error": err.to_string() }))).into_response()
}
