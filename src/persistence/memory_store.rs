//! In-process [`EngineStore`] used by tests and by `STORE_BACKEND=memory`.

use crate::domain::entities::position::Position;
use crate::domain::entities::risk_limits::RiskLimits;
use crate::domain::entities::risk_metrics::RiskMetrics;
use crate::domain::entities::signal::Signal;
use crate::domain::entities::strategy_config::StrategyConfig;
use crate::domain::entities::trade::Trade;
use crate::domain::entities::trading_preferences::TradingPreferences;
use crate::domain::entities::user::UserId;
use crate::domain::errors::StoreError;
use crate::domain::repositories::engine_store::{EngineStore, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    configs: HashMap<UserId, StrategyConfig>,
    limits: HashMap<UserId, RiskLimits>,
    preferences: HashMap<UserId, TradingPreferences>,
    /// Insertion order
    signals: Vec<Signal>,
    metrics: Vec<RiskMetrics>,
    positions: Vec<Position>,
    trades: Vec<Trade>,
    unavailable: bool,
}

impl Tables {
    fn check(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable` until reset
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.write().await.unavailable = unavailable;
    }

    pub async fn metrics_count(&self, user: &UserId) -> usize {
        let tables = self.tables.read().await;
        tables.metrics.iter().filter(|m| &m.user_id == user).count()
    }

    pub async fn all_positions(&self, user: &UserId) -> Vec<Position> {
        let tables = self.tables.read().await;
        tables.positions.iter().filter(|p| &p.user_id == user).cloned().collect()
    }
}

/// Newest first by timestamp, later insertion wins ties
fn newest_first<T: Clone>(
    items: &[T],
    keep: impl Fn(&T) -> bool,
    at: impl Fn(&T) -> DateTime<Utc>,
    limit: usize,
) -> Vec<T> {
    let mut selected: Vec<(usize, &T)> = items.iter().enumerate().filter(|(_, t)| keep(t)).collect();
    selected.sort_by(|(ia, a), (ib, b)| at(b).cmp(&at(a)).then(ib.cmp(ia)));
    selected.into_iter().take(limit).map(|(_, t)| t.clone()).collect()
}

#[async_trait]
impl EngineStore for InMemoryStore {
    async fn load_strategy_config(&self, user: &UserId) -> StoreResult<Option<StrategyConfig>> {
        let tables = self.tables.read().await;
        tables.check()?;
        Ok(tables.configs.get(user).cloned())
    }

    async fn save_strategy_config(&self, config: &StrategyConfig) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        tables.configs.insert(config.user_id.clone(), config.clone());
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        if tables.signals.iter().any(|s| s.id == signal.id) {
            return Err(StoreError::Query(format!("duplicate signal id {}", signal.id)));
        }
        tables.signals.push(signal.clone());
        Ok(())
    }

    async fn mark_signal_executed(&self, signal_id: &str, order_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        Ok(tables
            .signals
            .iter_mut()
            .find(|s| s.id == signal_id)
            .map(|s| s.mark_executed(order_id, at))
            .unwrap_or(false))
    }

    async fn recent_signals(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Signal>> {
        let tables = self.tables.read().await;
        tables.check()?;
        Ok(newest_first(&tables.signals, |s| &s.user_id == user, |s| s.created_at, limit))
    }

    async fn insert_risk_metrics(&self, metrics: &RiskMetrics) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        tables.metrics.push(metrics.clone());
        Ok(())
    }

    async fn latest_risk_metrics(&self, user: &UserId) -> StoreResult<Option<RiskMetrics>> {
        let tables = self.tables.read().await;
        tables.check()?;
        Ok(newest_first(&tables.metrics, |m| &m.user_id == user, |m| m.calculated_at, 1)
            .into_iter()
            .next())
    }

    async fn load_risk_limits(&self, user: &UserId) -> StoreResult<Option<RiskLimits>> {
        let tables = self.tables.read().await;
        tables.check()?;
        Ok(tables.limits.get(user).cloned())
    }

    async fn save_risk_limits(&self, limits: &RiskLimits) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        tables.limits.insert(limits.user_id.clone(), limits.clone());
        Ok(())
    }

    async fn load_trading_preferences(&self, user: &UserId) -> StoreResult<Option<TradingPreferences>> {
        let tables = self.tables.read().await;
        tables.check()?;
        Ok(tables.preferences.get(user).cloned())
    }

    async fn save_trading_preferences(&self, prefs: &TradingPreferences) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        tables.preferences.insert(prefs.user_id.clone(), prefs.clone());
        Ok(())
    }

    async fn users_with_auto_trading(&self) -> StoreResult<Vec<UserId>> {
        let tables = self.tables.read().await;
        tables.check()?;
        let mut users: Vec<UserId> = tables
            .preferences
            .values()
            .filter(|p| p.auto_trading_enabled)
            .map(|p| p.user_id.clone())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn open_positions(&self, user: &UserId) -> StoreResult<Vec<Position>> {
        let tables = self.tables.read().await;
        tables.check()?;
        Ok(tables
            .positions
            .iter()
            .filter(|p| &p.user_id == user && p.is_open())
            .cloned()
            .collect())
    }

    async fn upsert_position(&self, position: &Position) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        match tables.positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => *existing = position.clone(),
            None => tables.positions.push(position.clone()),
        }
        Ok(())
    }

    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check()?;
        tables.trades.push(trade.clone());
        Ok(())
    }

    async fn recent_trades(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Trade>> {
        let tables = self.tables.read().await;
        tables.check()?;
        Ok(newest_first(&tables.trades, |t| &t.user_id == user, |t| t.executed_at, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::position::PositionSide;
    use crate::domain::entities::signal::reasons;

    #[tokio::test]
    async fn test_signals_newest_first_with_ties() {
        let store = InMemoryStore::new();
        let user = UserId::new("u1");
        let at = Utc::now();
        for symbol in ["AAPL", "MSFT", "NVDA"] {
            let signal = Signal::hold(user.clone(), symbol, 1.0, reasons::CONDITIONS_NOT_MET, None, at);
            store.insert_signal(&signal).await.unwrap();
        }
        let signals = store.recent_signals(&user, 10).await.unwrap();
        let symbols: Vec<&str> = signals.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["NVDA", "MSFT", "AAPL"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryStore::new();
        let user = UserId::new("u1");
        let mut position = Position::open(user.clone(), "AAPL", PositionSide::Long, 5.0, 10.0, 10.0, Utc::now());
        store.upsert_position(&position).await.unwrap();
        position.close(12.0, Utc::now());
        store.upsert_position(&position).await.unwrap();

        assert!(store.open_positions(&user).await.unwrap().is_empty());
        assert_eq!(store.all_positions(&user).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_unavailable(true).await;
        let err = store.users_with_auto_trading().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_unavailable(false).await;
        assert!(store.users_with_auto_trading().await.unwrap().is_empty());
    }
}
