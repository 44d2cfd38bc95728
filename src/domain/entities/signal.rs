use crate::domain::entities::user::UserId;
use crate::domain::services::indicators::IndicatorSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason codes recorded on signals
pub mod reasons {
    pub const INSUFFICIENT_DATA: &str = "insufficient_data";
    pub const DATA_UNAVAILABLE: &str = "data_unavailable";
    pub const PRICE_FILTER: &str = "price_filter";
    pub const VOLUME_FILTER: &str = "volume_filter";
    pub const SECTOR_FILTER: &str = "sector_filter";
    pub const CONDITIONS_NOT_MET: &str = "conditions_not_met";
    pub const POSITION_SIZE_ZERO: &str = "position_size_zero";
    pub const ENTRY_CONDITIONS_MET: &str = "entry_conditions_met";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Hold,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "buy",
            SignalType::Hold => "hold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buy" => Some(SignalType::Buy),
            "hold" => Some(SignalType::Hold),
            _ => None,
        }
    }
}

/// A logged buy/hold decision for one symbol. Append-only: the only field
/// that ever changes after creation is `executed` (false -> true, once).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub user_id: UserId,
    pub symbol: String,
    pub signal_type: SignalType,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: u64,
    pub risk_amount: f64,
    pub atr: f64,
    pub reason: String,
    pub indicators: Option<IndicatorSnapshot>,
    pub executed: bool,
    pub order_id: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Hold decision with no sizing attached
    pub fn hold(
        user_id: UserId,
        symbol: impl Into<String>,
        price: f64,
        reason: impl Into<String>,
        indicators: Option<IndicatorSnapshot>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Signal {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            symbol: symbol.into(),
            signal_type: SignalType::Hold,
            price,
            stop_loss: 0.0,
            take_profit: 0.0,
            position_size: 0,
            risk_amount: 0.0,
            atr: 0.0,
            reason: reason.into(),
            indicators,
            executed: false,
            order_id: None,
            executed_at: None,
            created_at,
        }
    }

    /// Buy with a positive size and not yet submitted
    pub fn is_actionable(&self) -> bool {
        self.signal_type == SignalType::Buy && self.position_size > 0 && !self.executed
    }

    /// Returns false when the signal had already been executed
    pub fn mark_executed(&mut self, order_id: &str, at: DateTime<Utc>) -> bool {
        if self.executed {
            return false;
        }
        self.executed = true;
        self.order_id = Some(order_id.to_string());
        self.executed_at = Some(at);
        true
    }
}
