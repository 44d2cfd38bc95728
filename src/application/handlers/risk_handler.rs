use super::{parse_body, ApiError, AppState};
use crate::auth::AuthenticatedUser;
use crate::domain::entities::risk_limits::{RiskLimits, RiskLimitsUpdate};
use crate::domain::entities::risk_metrics::RiskMetrics;
use crate::domain::services::risk_engine::{BreachReport, Confirmation, EmergencyStopReport};
use axum::{body::Bytes, extract::State, Extension, Json};
use serde_json::Value;

/// Latest snapshot, computed on first access
pub async fn get_risk_metrics(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Json<RiskMetrics>, ApiError> {
    Ok(Json(state.engine.risk_metrics(&user).await?))
}

pub async fn calculate_risk_metrics(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Json<RiskMetrics>, ApiError> {
    Ok(Json(state.engine.calculate_risk_metrics(&user).await?))
}

pub async fn get_risk_limits(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Json<RiskLimits>, ApiError> {
    Ok(Json(state.engine.risk_limits(&user).await?))
}

/// Partial update; 400 when no recognized field is present or a value is
/// invalid
pub async fn update_risk_limits(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(body): Json<Value>,
) -> Result<Json<RiskLimits>, ApiError> {
    let update: RiskLimitsUpdate = parse_body(body)?;
    Ok(Json(state.engine.update_risk_limits(&user, &update).await?))
}

/// The confirmation is checked here, before the engine is reached
pub async fn emergency_stop(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    body: Bytes,
) -> Result<Json<EmergencyStopReport>, ApiError> {
    // a missing or malformed body is an unconfirmed request
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let typed = body.get("confirmation").and_then(Value::as_str).unwrap_or_default();
    let confirmation = Confirmation::parse(typed)?;
    Ok(Json(state.engine.emergency_stop(&user, confirmation).await?))
}

pub async fn check_breaches(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Json<BreachReport>, ApiError> {
    Ok(Json(state.engine.check_breaches(&user).await?))
}
