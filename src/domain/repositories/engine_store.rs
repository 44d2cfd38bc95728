//! Persistence contract of the engine. Every record is keyed by user.

use crate::domain::entities::position::Position;
use crate::domain::entities::risk_limits::RiskLimits;
use crate::domain::entities::risk_metrics::RiskMetrics;
use crate::domain::entities::signal::Signal;
use crate::domain::entities::strategy_config::StrategyConfig;
use crate::domain::entities::trade::Trade;
use crate::domain::entities::trading_preferences::TradingPreferences;
use crate::domain::entities::user::UserId;
use crate::domain::errors::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn load_strategy_config(&self, user: &UserId) -> StoreResult<Option<StrategyConfig>>;
    async fn save_strategy_config(&self, config: &StrategyConfig) -> StoreResult<()>;

    async fn insert_signal(&self, signal: &Signal) -> StoreResult<()>;
    /// Flip `executed` on a signal. Returns false if it was already executed
    /// or does not exist.
    async fn mark_signal_executed(
        &self,
        signal_id: &str,
        order_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Newest first
    async fn recent_signals(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Signal>>;

    async fn insert_risk_metrics(&self, metrics: &RiskMetrics) -> StoreResult<()>;
    async fn latest_risk_metrics(&self, user: &UserId) -> StoreResult<Option<RiskMetrics>>;

    async fn load_risk_limits(&self, user: &UserId) -> StoreResult<Option<RiskLimits>>;
    async fn save_risk_limits(&self, limits: &RiskLimits) -> StoreResult<()>;

    async fn load_trading_preferences(&self, user: &UserId) -> StoreResult<Option<TradingPreferences>>;
    async fn save_trading_preferences(&self, prefs: &TradingPreferences) -> StoreResult<()>;
    /// Users whose auto-trading flag is on
    async fn users_with_auto_trading(&self) -> StoreResult<Vec<UserId>>;

    async fn open_positions(&self, user: &UserId) -> StoreResult<Vec<Position>>;
    /// Insert or replace by position id
    async fn upsert_position(&self, position: &Position) -> StoreResult<()>;

    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()>;
    /// Newest first
    async fn recent_trades(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Trade>>;
}
