//! Brokerage Client Trait
//!
//! The engine never talks to a brokerage directly. Everything it needs from
//! one (account state, positions, bars, order routing) goes through
//! `BrokerClient`, which keeps the trading logic independent of any vendor
//! and lets tests drive the engine with a simulated broker.

use crate::domain::entities::order::{OrderAck, OrderRequest};
use crate::domain::entities::position::PositionSide;
use crate::domain::entities::price_bar::PriceBar;
use crate::domain::entities::user::UserId;
use crate::domain::errors::BrokerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Account state at the time of the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
    /// Equity at the previous session close
    pub last_equity: f64,
}

/// A position as the brokerage reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub side: PositionSide,
}

impl BrokerPosition {
    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }
}

/// Bar resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    FifteenMinutes,
    Hour,
    Day,
}

impl Timeframe {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "15Min" => Some(Timeframe::FifteenMinutes),
            "1Hour" => Some(Timeframe::Hour),
            "1Day" => Some(Timeframe::Day),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::FifteenMinutes => "15Min",
            Timeframe::Hour => "1Hour",
            Timeframe::Day => "1Day",
        }
    }
}

/// Brokerage operations consumed by the engine. Every call may fail with a
/// transient error (see [`BrokerError::is_transient`]).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Name of this brokerage, for logs
    fn name(&self) -> &str;

    async fn get_account(&self, user: &UserId) -> BrokerResult<AccountSnapshot>;

    async fn get_positions(&self, user: &UserId) -> BrokerResult<Vec<BrokerPosition>>;

    /// Most recent `limit` bars, oldest first
    async fn get_bars(
        &self,
        user: &UserId,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> BrokerResult<Vec<PriceBar>>;

    async fn submit_order(&self, user: &UserId, order: &OrderRequest) -> BrokerResult<OrderAck>;

    async fn cancel_order(&self, user: &UserId, order_id: &str) -> BrokerResult<()>;

    /// Market-close the whole position in `symbol`
    async fn close_position(&self, user: &UserId, symbol: &str) -> BrokerResult<OrderAck>;

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse() {
        assert_eq!(Timeframe::parse("1Day"), Some(Timeframe::Day));
        assert_eq!(Timeframe::parse("15Min"), Some(Timeframe::FifteenMinutes));
        assert_eq!(Timeframe::parse("1Week"), None);
        assert_eq!(Timeframe::Hour.as_str(), "1Hour");
    }

    #[test]
    fn test_broker_position_market_value() {
        let position = BrokerPosition {
            symbol: "AAPL".to_string(),
            quantity: 10.0,
            avg_entry_price: 100.0,
            current_price: 120.0,
            side: PositionSide::Long,
        };
        assert_eq!(position.market_value(), 1200.0);
    }
}
