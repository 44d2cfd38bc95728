use crate::domain::entities::order::OrderSide;
use crate::domain::entities::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an order was sent
pub mod trade_reasons {
    pub const ENTRY: &str = "entry";
    pub const STOP_LOSS: &str = "stop_loss";
    pub const TAKE_PROFIT: &str = "take_profit";
    pub const TECHNICAL: &str = "technical";
    pub const EMERGENCY_STOP: &str = "emergency_stop";
}

/// Append-only record of an order the brokerage accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub order_id: String,
    pub signal_id: Option<String>,
    pub reason: String,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        price: f64,
        order_id: impl Into<String>,
        signal_id: Option<String>,
        reason: impl Into<String>,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            symbol: symbol.into(),
            side,
            quantity,
            price,
            order_id: order_id.into(),
            signal_id,
            reason: reason.into(),
            executed_at,
        }
    }
}
