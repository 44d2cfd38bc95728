use crate::domain::entities::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// symbol -> symbol -> Pearson correlation of daily returns
pub type CorrelationMatrix = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorConcentration {
    pub sector: String,
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionConcentration {
    pub symbol: String,
    pub value: f64,
    pub percentage: f64,
}

/// Immutable portfolio risk snapshot. Percent-valued fields use a 0-100
/// scale. The history is append-only; the latest `calculated_at` wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub id: String,
    pub user_id: UserId,
    pub current_risk_exposure: f64,
    pub portfolio_value: f64,
    pub cash_available: f64,
    pub daily_pnl: f64,
    pub daily_pnl_percent: f64,
    pub peak_portfolio_value: f64,
    pub current_drawdown: f64,
    pub max_drawdown: f64,
    pub sector_concentration: Vec<SectorConcentration>,
    pub position_concentration: Vec<PositionConcentration>,
    pub correlation_matrix: CorrelationMatrix,
    pub volatility_index: f64,
    pub calculated_at: DateTime<Utc>,
}

impl RiskMetrics {
    /// Daily loss as a positive percentage, 0 on a flat or up day
    pub fn daily_loss_percent(&self) -> f64 {
        (-self.daily_pnl_percent).max(0.0)
    }

    /// Daily loss as a positive dollar amount, 0 on a flat or up day
    pub fn daily_loss_amount(&self) -> f64 {
        (-self.daily_pnl).max(0.0)
    }
}
