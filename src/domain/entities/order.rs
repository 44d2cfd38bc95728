use crate::domain::errors::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Market entry, optionally with attached stop-loss and take-profit legs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Bracket { stop_loss: f64, take_profit: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub kind: OrderKind,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: u64) -> Result<Self, ValidationError> {
        Self::build(symbol.into(), side, quantity, OrderKind::Market)
    }

    /// Buy bracket: stop below the reference price, target above it
    pub fn bracket_buy(
        symbol: impl Into<String>,
        quantity: u64,
        reference_price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<Self, ValidationError> {
        if !(stop_loss > 0.0 && stop_loss < reference_price && take_profit > reference_price) {
            return Err(ValidationError::InvalidField {
                field: "bracket",
                reason: format!(
                    "expected 0 < stop ({:.2}) < price ({:.2}) < target ({:.2})",
                    stop_loss, reference_price, take_profit
                ),
            });
        }
        Self::build(
            symbol.into(),
            OrderSide::Buy,
            quantity,
            OrderKind::Bracket {
                stop_loss,
                take_profit,
            },
        )
    }

    fn build(symbol: String, side: OrderSide, quantity: u64, kind: OrderKind) -> Result<Self, ValidationError> {
        if quantity == 0 {
            return Err(ValidationError::InvalidField {
                field: "quantity",
                reason: "must be at least one share".to_string(),
            });
        }
        Ok(OrderRequest {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            symbol,
            side,
            quantity,
            kind,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Accepted,
    Filled,
    PartiallyFilled,
    Cancelled,
}

/// Brokerage acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub filled_price: Option<f64>,
}
