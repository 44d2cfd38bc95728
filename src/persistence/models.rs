//! Database models
//!
//! Row shapes for each table plus conversions into domain entities. A row
//! that does not parse back into an entity is reported as corrupt.

use crate::domain::entities::order::OrderSide;
use crate::domain::entities::position::{Position, PositionSide, PositionStatus};
use crate::domain::entities::signal::{Signal, SignalType};
use crate::domain::entities::trade::Trade;
use crate::domain::entities::trading_preferences::{TradingPreferences, TradingStatus};
use crate::domain::entities::user::UserId;
use crate::domain::errors::StoreError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::FromRow;

fn corrupt(table: &str, field: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("{}.{}: unexpected value '{}'", table, field, value))
}

pub(crate) fn from_json<T: DeserializeOwned>(table: &str, json: &str) -> Result<T, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt(format!("{}: {}", table, e)))
}

pub(crate) fn to_json<T: serde::Serialize>(table: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Query(format!("{}: {}", table, e)))
}

/// JSON document row, shared by strategy_configs and risk_limits
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRecord {
    pub user_id: String,
    pub document: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TradingPreferencesRecord {
    pub user_id: String,
    pub auto_trading_enabled: bool,
    pub trading_status: String,
    pub last_toggle_time: Option<DateTime<Utc>>,
}

impl TryFrom<TradingPreferencesRecord> for TradingPreferences {
    type Error = StoreError;

    fn try_from(r: TradingPreferencesRecord) -> Result<Self, Self::Error> {
        let trading_status = TradingStatus::parse(&r.trading_status)
            .ok_or_else(|| corrupt("trading_preferences", "trading_status", &r.trading_status))?;
        Ok(TradingPreferences {
            user_id: UserId::new(r.user_id),
            auto_trading_enabled: r.auto_trading_enabled,
            trading_status,
            last_toggle_time: r.last_toggle_time,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SignalRecord {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub signal_type: String,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: i64,
    pub risk_amount: f64,
    pub atr: f64,
    pub reason: String,
    pub indicators_json: Option<String>,
    pub executed: bool,
    pub order_id: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SignalRecord> for Signal {
    type Error = StoreError;

    fn try_from(r: SignalRecord) -> Result<Self, Self::Error> {
        let signal_type = SignalType::parse(&r.signal_type)
            .ok_or_else(|| corrupt("signals", "signal_type", &r.signal_type))?;
        let position_size = u64::try_from(r.position_size)
            .map_err(|_| corrupt("signals", "position_size", &r.position_size.to_string()))?;
        let indicators = r
            .indicators_json
            .as_deref()
            .map(|json| from_json("signals", json))
            .transpose()?;

        Ok(Signal {
            id: r.id,
            user_id: UserId::new(r.user_id),
            symbol: r.symbol,
            signal_type,
            price: r.price,
            stop_loss: r.stop_loss,
            take_profit: r.take_profit,
            position_size,
            risk_amount: r.risk_amount,
            atr: r.atr,
            reason: r.reason,
            indicators,
            executed: r.executed,
            order_id: r.order_id,
            executed_at: r.executed_at,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RiskMetricsRecord {
    pub id: String,
    pub user_id: String,
    pub snapshot_json: String,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PositionRecord {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub cost_basis: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_percent: f64,
    pub status: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
    pub realized_pl: Option<f64>,
}

impl TryFrom<PositionRecord> for Position {
    type Error = StoreError;

    fn try_from(r: PositionRecord) -> Result<Self, Self::Error> {
        let side =
            PositionSide::parse(&r.side).ok_or_else(|| corrupt("positions", "side", &r.side))?;
        let status = PositionStatus::parse(&r.status)
            .ok_or_else(|| corrupt("positions", "status", &r.status))?;

        Ok(Position {
            id: r.id,
            user_id: UserId::new(r.user_id),
            symbol: r.symbol,
            side,
            quantity: r.quantity,
            entry_price: r.entry_price,
            current_price: r.current_price,
            market_value: r.market_value,
            cost_basis: r.cost_basis,
            unrealized_pl: r.unrealized_pl,
            unrealized_pl_percent: r.unrealized_pl_percent,
            status,
            opened_at: r.opened_at,
            closed_at: r.closed_at,
            close_price: r.close_price,
            realized_pl: r.realized_pl,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub order_id: String,
    pub signal_id: Option<String>,
    pub reason: String,
    pub executed_at: DateTime<Utc>,
}

impl TryFrom<TradeRecord> for Trade {
    type Error = StoreError;

    fn try_from(r: TradeRecord) -> Result<Self, Self::Error> {
        let side = OrderSide::parse(&r.side).ok_or_else(|| corrupt("trades", "side", &r.side))?;
        Ok(Trade {
            id: r.id,
            user_id: UserId::new(r.user_id),
            symbol: r.symbol,
            side,
            quantity: r.quantity,
            price: r.price,
            order_id: r.order_id,
            signal_id: r.signal_id,
            reason: r.reason,
            executed_at: r.executed_at,
        })
    }
}
