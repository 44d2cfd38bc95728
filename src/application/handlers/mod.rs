//! HTTP surface of the engine
//!
//! Thin axum handlers: parse, call [`TradingEngine`], map errors. Every route
//! except `/health` runs behind API-key auth and the per-user rate limiter,
//! and acts on the authenticated user only.

pub mod risk_handler;
pub mod strategy_handler;

use crate::application::services::trading_engine::TradingEngine;
use crate::auth::{require_auth, ApiKeys};
use crate::domain::errors::{EngineError, StoreError, ValidationError};
use crate::rate_limit::{rate_limit_middleware, UserRateLimiter};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TradingEngine>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError(EngineError::Validation(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Broker(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Broker(_) => StatusCode::BAD_GATEWAY,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::LoopUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = match &self.0 {
            EngineError::Broker(e) => Some(e.error_code().to_string()),
            EngineError::Store(StoreError::Unavailable(_)) => Some("ERR_STORE_UNAVAILABLE".to_string()),
            _ => None,
        };
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

/// Decode a JSON body, turning shape errors into 400s
pub fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| {
        ApiError::from(ValidationError::InvalidField {
            field: "body",
            reason: e.to_string(),
        })
    })
}

pub fn router(engine: Arc<TradingEngine>, keys: Arc<ApiKeys>, limiter: UserRateLimiter) -> Router {
    let state = AppState { engine };

    let protected = Router::new()
        .route("/risk/metrics", get(risk_handler::get_risk_metrics))
        .route("/risk/metrics/calculate", post(risk_handler::calculate_risk_metrics))
        .route(
            "/risk/limits",
            get(risk_handler::get_risk_limits).put(risk_handler::update_risk_limits),
        )
        .route("/risk/emergency-stop", post(risk_handler::emergency_stop))
        .route("/risk/check-breaches", get(risk_handler::check_breaches))
        .route("/strategy/auto-trading/toggle", post(strategy_handler::toggle_auto_trading))
        .route("/strategy/auto-trading/status", get(strategy_handler::auto_trading_status))
        .route(
            "/strategy/config",
            get(strategy_handler::get_strategy_config).put(strategy_handler::update_strategy_config),
        )
        .route("/strategy/signals", get(strategy_handler::recent_signals))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(middleware::from_fn_with_state(keys, require_auth));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker: String,
    pub broker_healthy: bool,
    pub active_loops: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        broker: state.engine.broker_name().to_string(),
        broker_healthy: state.engine.broker_healthy().await,
        active_loops: state.engine.active_loops().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::BrokerError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::from(ValidationError::ConfirmationRequired), StatusCode::BAD_REQUEST),
            (EngineError::from(BrokerError::Timeout), StatusCode::SERVICE_UNAVAILABLE),
            (
                EngineError::from(BrokerError::OrderRejected("halted".to_string())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                EngineError::from(StoreError::Query("boom".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                EngineError::LoopUnavailable("gone".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }

    #[test]
    fn test_parse_body_rejects_wrong_shape() {
        #[derive(Debug, Deserialize)]
        struct Body {
            #[allow(dead_code)]
            enabled: bool,
        }
        let err = parse_body::<Body>(serde_json::json!({"enabled": "yes"})).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
