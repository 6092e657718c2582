use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use serde_json::json;

use envwatch_infra::ai::{ForecastError, prediction_date};

use crate::app::dto::{self, MultipleWeatherQuery, WeatherQuery};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/air-quality", get(predict_air_quality))
        .route("/weather", get(predict_weather))
        .route("/weather/multiple", get(predict_weather_multiple))
}

pub async fn predict_air_quality(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.air_quality.classify(Utc::now()).await {
        Ok(probabilities) => (StatusCode::OK, Json(json!({ "aq_probabilities": probabilities }))).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "air quality classification failed");
            errors::air_quality_error_to_response(e)
        }
    }
}

fn forecast_failure_response(err: &ForecastError) -> axum::response::Response {
    (errors::forecast_status(err), Json(errors::forecast_failure(err))).into_response()
}

pub async fn predict_weather(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<WeatherQuery>,
) -> axum::response::Response {
    let days = match dto::parse_days(query.days.as_deref()) {
        Ok(days) => days,
        Err(msg) => return forecast_failure_response(&ForecastError::Validation(msg)),
    };
    let feature = query
        .feature
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(dto::DEFAULT_FEATURE)
        .to_string();

    match services.forecasts.predict_weather(&feature, days, Utc::now()).await {
        Ok(forecast) => (StatusCode::OK, Json(dto::weather_forecast_json(&forecast))).into_response(),
        Err(e) => {
            tracing::warn!(feature = %feature, days, error = %e, "weather prediction failed");
            forecast_failure_response(&e)
        }
    }
}

pub async fn predict_weather_multiple(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<MultipleWeatherQuery>,
) -> axum::response::Response {
    let days = match dto::parse_days(query.days.as_deref()) {
        Ok(days) => days,
        Err(msg) => return forecast_failure_response(&ForecastError::Validation(msg)),
    };
    let features = dto::split_features(query.features.as_deref().unwrap_or(dto::DEFAULT_MULTIPLE_FEATURES));
    if features.is_empty() {
        return forecast_failure_response(&ForecastError::Validation("features cannot be empty".to_string()));
    }

    let now = Utc::now();
    match services.forecasts.predict_many(&features, days, now).await {
        Ok(outcomes) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "predictions": dto::feature_forecasts_json(&outcomes),
                "prediction_date": prediction_date(now, days),
                "days_ahead": days,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(?features, days, error = %e, "multiple weather prediction failed");
            forecast_failure_response(&e)
        }
    }
}
