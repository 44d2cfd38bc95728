use super::{parse_body, ApiError, AppState};
use crate::application::actors::trading_loop::LoopStatus;
use crate::auth::AuthenticatedUser;
use crate::domain::entities::signal::Signal;
use crate::domain::entities::strategy_config::{StrategyConfig, StrategyConfigUpdate};
use crate::domain::entities::trading_preferences::{TradingPreferences, TradingStatus};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    pub auto_trading_enabled: bool,
    pub trading_status: TradingStatus,
    pub last_toggle_time: Option<DateTime<Utc>>,
}

impl From<TradingPreferences> for ToggleResponse {
    fn from(prefs: TradingPreferences) -> Self {
        Self {
            auto_trading_enabled: prefs.auto_trading_enabled,
            trading_status: prefs.trading_status,
            last_toggle_time: prefs.last_toggle_time,
        }
    }
}

/// Query parameters for the signals endpoint
#[derive(Debug, Deserialize)]
pub struct SignalsQuery {
    /// Default 50, max 500
    pub limit: Option<usize>,
}

pub async fn toggle_auto_trading(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(body): Json<Value>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let request: ToggleRequest = parse_body(body)?;
    let prefs = state.engine.toggle_auto_trading(&user, request.enabled).await?;
    Ok(Json(prefs.into()))
}

pub async fn auto_trading_status(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Json<LoopStatus>, ApiError> {
    Ok(Json(state.engine.auto_trading_status(&user).await?))
}

pub async fn get_strategy_config(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Result<Json<StrategyConfig>, ApiError> {
    Ok(Json(state.engine.strategy_config(&user).await?))
}

pub async fn update_strategy_config(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(body): Json<Value>,
) -> Result<Json<StrategyConfig>, ApiError> {
    let update: StrategyConfigUpdate = parse_body(body)?;
    Ok(Json(state.engine.update_strategy_config(&user, update).await?))
}

pub async fn recent_signals(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Query(params): Query<SignalsQuery>,
) -> Result<Json<Vec<Signal>>, ApiError> {
    Ok(Json(state.engine.recent_signals(&user, params.limit).await?))
}
