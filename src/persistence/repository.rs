//! Database Repository
//!
//! SQLite implementation of [`EngineStore`].

use super::models::*;
use super::DbPool;
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
use tracing::{debug, error};

fn store_error(operation: &str, e: sqlx::Error) -> StoreError {
    error!("Failed to {}: {}", operation, e);
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("Failed to {}: {}", operation, e))
        }
        other => StoreError::Query(format!("Failed to {}: {}", operation, other)),
    }
}

fn row_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_document(&self, table: &str, column: &str, user: &UserId) -> StoreResult<Option<DocumentRecord>> {
        let sql = format!(
            "SELECT user_id, {} AS document, updated_at FROM {} WHERE user_id = ?1",
            column, table
        );
        sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(&format!("load {}", table), e))
    }

    async fn save_document(
        &self,
        table: &str,
        column: &str,
        user: &UserId,
        document: String,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {table} (user_id, {column}, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO UPDATE SET {column} = excluded.{column}, updated_at = excluded.updated_at",
        );
        sqlx::query(&sql)
            .bind(user.as_str())
            .bind(document)
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(&format!("save {}", table), e))?;

        debug!("Saved {} for {}", table, user);
        Ok(())
    }
}

#[async_trait]
impl EngineStore for SqliteStore {
    async fn load_strategy_config(&self, user: &UserId) -> StoreResult<Option<StrategyConfig>> {
        self.load_document("strategy_configs", "config_json", user)
            .await?
            .map(|r| from_json("strategy_configs", &r.document))
            .transpose()
    }

    async fn save_strategy_config(&self, config: &StrategyConfig) -> StoreResult<()> {
        let document = to_json("strategy_configs", config)?;
        self.save_document("strategy_configs", "config_json", &config.user_id, document, config.updated_at)
            .await
    }

    async fn insert_signal(&self, signal: &Signal) -> StoreResult<()> {
        let indicators = signal
            .indicators
            .as_ref()
            .map(|i| to_json("signals", i))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO signals (
                id, user_id, symbol, signal_type, price, stop_loss, take_profit,
                position_size, risk_amount, atr, reason, indicators_json,
                executed, order_id, executed_at, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&signal.id)
        .bind(signal.user_id.as_str())
        .bind(&signal.symbol)
        .bind(signal.signal_type.as_str())
        .bind(signal.price)
        .bind(signal.stop_loss)
        .bind(signal.take_profit)
        .bind(i64::try_from(signal.position_size).unwrap_or(i64::MAX))
        .bind(signal.risk_amount)
        .bind(signal.atr)
        .bind(&signal.reason)
        .bind(indicators)
        .bind(signal.executed)
        .bind(&signal.order_id)
        .bind(signal.executed_at)
        .bind(signal.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("insert signal", e))?;

        debug!("Recorded {} signal {} for {}", signal.signal_type.as_str(), signal.id, signal.symbol);
        Ok(())
    }

    async fn mark_signal_executed(&self, signal_id: &str, order_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE signals
            SET executed = 1, order_id = ?1, executed_at = ?2
            WHERE id = ?3 AND executed = 0
            "#,
        )
        .bind(order_id)
        .bind(at)
        .bind(signal_id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("mark signal executed", e))?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn recent_signals(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Signal>> {
        let records = sqlx::query_as::<_, SignalRecord>(
            "SELECT * FROM signals WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user.as_str())
        .bind(row_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list signals", e))?;

        records.into_iter().map(Signal::try_from).collect()
    }

    async fn insert_risk_metrics(&self, metrics: &RiskMetrics) -> StoreResult<()> {
        let snapshot = to_json("risk_metrics", metrics)?;
        sqlx::query(
            r#"
            INSERT INTO risk_metrics (id, user_id, portfolio_value, current_drawdown, snapshot_json, calculated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&metrics.id)
        .bind(metrics.user_id.as_str())
        .bind(metrics.portfolio_value)
        .bind(metrics.current_drawdown)
        .bind(snapshot)
        .bind(metrics.calculated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("insert risk metrics", e))?;

        Ok(())
    }

    async fn latest_risk_metrics(&self, user: &UserId) -> StoreResult<Option<RiskMetrics>> {
        let record = sqlx::query_as::<_, RiskMetricsRecord>(
            r#"
            SELECT id, user_id, snapshot_json, calculated_at FROM risk_metrics
            WHERE user_id = ?1
            ORDER BY calculated_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("load risk metrics", e))?;

        record
            .map(|r| from_json("risk_metrics", &r.snapshot_json))
            .transpose()
    }

    async fn load_risk_limits(&self, user: &UserId) -> StoreResult<Option<RiskLimits>> {
        self.load_document("risk_limits", "limits_json", user)
            .await?
            .map(|r| from_json("risk_limits", &r.document))
            .transpose()
    }

    async fn save_risk_limits(&self, limits: &RiskLimits) -> StoreResult<()> {
        let document = to_json("risk_limits", limits)?;
        self.save_document("risk_limits", "limits_json", &limits.user_id, document, limits.updated_at)
            .await
    }

    async fn load_trading_preferences(&self, user: &UserId) -> StoreResult<Option<TradingPreferences>> {
        let record = sqlx::query_as::<_, TradingPreferencesRecord>(
            "SELECT * FROM trading_preferences WHERE user_id = ?1",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("load trading preferences", e))?;

        record.map(TradingPreferences::try_from).transpose()
    }

    async fn save_trading_preferences(&self, prefs: &TradingPreferences) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_preferences (user_id, auto_trading_enabled, trading_status, last_toggle_time)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                auto_trading_enabled = excluded.auto_trading_enabled,
                trading_status = excluded.trading_status,
                last_toggle_time = excluded.last_toggle_time
            "#,
        )
        .bind(prefs.user_id.as_str())
        .bind(prefs.auto_trading_enabled)
        .bind(prefs.trading_status.as_str())
        .bind(prefs.last_toggle_time)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("save trading preferences", e))?;

        debug!(
            "Saved trading preferences for {}: enabled={} status={}",
            prefs.user_id,
            prefs.auto_trading_enabled,
            prefs.trading_status.as_str()
        );
        Ok(())
    }

    async fn users_with_auto_trading(&self) -> StoreResult<Vec<UserId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM trading_preferences WHERE auto_trading_enabled = 1 ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list auto-trading users", e))?;

        Ok(rows.into_iter().map(|(id,)| UserId::new(id)).collect())
    }

    async fn open_positions(&self, user: &UserId) -> StoreResult<Vec<Position>> {
        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ?1 AND status = 'open' ORDER BY opened_at",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list open positions", e))?;

        records.into_iter().map(Position::try_from).collect()
    }

    async fn upsert_position(&self, position: &Position) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, user_id, symbol, side, quantity, entry_price, current_price,
                market_value, cost_basis, unrealized_pl, unrealized_pl_percent,
                status, opened_at, closed_at, close_price, realized_pl
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(id) DO UPDATE SET
                quantity = excluded.quantity,
                entry_price = excluded.entry_price,
                current_price = excluded.current_price,
                market_value = excluded.market_value,
                cost_basis = excluded.cost_basis,
                unrealized_pl = excluded.unrealized_pl,
                unrealized_pl_percent = excluded.unrealized_pl_percent,
                status = excluded.status,
                closed_at = excluded.closed_at,
                close_price = excluded.close_price,
                realized_pl = excluded.realized_pl
            "#,
        )
        .bind(&position.id)
        .bind(position.user_id.as_str())
        .bind(&position.symbol)
        .bind(position.side.as_str())
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.current_price)
        .bind(position.market_value)
        .bind(position.cost_basis)
        .bind(position.unrealized_pl)
        .bind(position.unrealized_pl_percent)
        .bind(position.status.as_str())
        .bind(position.opened_at)
        .bind(position.closed_at)
        .bind(position.close_price)
        .bind(position.realized_pl)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("upsert position", e))?;

        debug!("Upserted position {} ({} {})", position.id, position.symbol, position.status.as_str());
        Ok(())
    }

    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user_id, symbol, side, quantity, price, order_id, signal_id, reason, executed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&trade.id)
        .bind(trade.user_id.as_str())
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(&trade.order_id)
        .bind(&trade.signal_id)
        .bind(&trade.reason)
        .bind(trade.executed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("insert trade", e))?;

        debug!("Recorded trade {} {} {} @ {}", trade.side, trade.quantity, trade.symbol, trade.price);
        Ok(())
    }

    async fn recent_trades(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Trade>> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE user_id = ?1 ORDER BY executed_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user.as_str())
        .bind(row_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list trades", e))?;

        records.into_iter().map(Trade::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderSide;
    use crate::domain::entities::position::PositionSide;
    use crate::domain::entities::signal::{reasons, SignalType};
    use crate::domain::entities::trade::trade_reasons;
    use crate::domain::repositories::broker_client::AccountSnapshot;
    use crate::domain::services::risk_calculator::{self, PortfolioInputs};
    use crate::persistence::{init_database, DatabaseConfig};
    use std::collections::BTreeMap;

    async fn store() -> SqliteStore {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        SqliteStore::new(pool)
    }

    fn metrics(user: &UserId, equity: f64, at: DateTime<Utc>) -> RiskMetrics {
        let account = AccountSnapshot {
            equity,
            cash: equity,
            buying_power: equity,
            last_equity: equity,
        };
        let returns = BTreeMap::new();
        let inputs = PortfolioInputs {
            account: &account,
            positions: &[],
            returns: &returns,
            previous: None,
        };
        risk_calculator::calculate(uuid::Uuid::new_v4().to_string(), user.clone(), &inputs, at)
    }

    #[tokio::test]
    async fn test_strategy_config_roundtrip() {
        let store = store().await;
        let user = UserId::new("u1");
        assert!(store.load_strategy_config(&user).await.unwrap().is_none());

        let mut config = StrategyConfig::default_for(user.clone(), Utc::now());
        config.max_open_positions = 3;
        store.save_strategy_config(&config).await.unwrap();

        config.risk_per_trade_percent = 2.0;
        store.save_strategy_config(&config).await.unwrap();

        let loaded = store.load_strategy_config(&user).await.unwrap().unwrap();
        assert_eq!(loaded.max_open_positions, 3);
        assert_eq!(loaded.risk_per_trade_percent, 2.0);
        assert_eq!(loaded.universe, config.universe);
    }

    #[tokio::test]
    async fn test_signal_execution_flips_once() {
        let store = store().await;
        let user = UserId::new("u1");
        let mut signal = Signal::hold(user.clone(), "AAPL", 150.0, reasons::ENTRY_CONDITIONS_MET, None, Utc::now());
        signal.signal_type = SignalType::Buy;
        signal.position_size = 10;
        store.insert_signal(&signal).await.unwrap();

        assert!(store.mark_signal_executed(&signal.id, "order-1", Utc::now()).await.unwrap());
        assert!(!store.mark_signal_executed(&signal.id, "order-2", Utc::now()).await.unwrap());
        assert!(!store.mark_signal_executed("missing", "order-3", Utc::now()).await.unwrap());

        let signals = store.recent_signals(&user, 10).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].executed);
        assert_eq!(signals[0].order_id.as_deref(), Some("order-1"));
        assert_eq!(signals[0].position_size, 10);
    }

    #[tokio::test]
    async fn test_recent_signals_newest_first() {
        let store = store().await;
        let user = UserId::new("u1");
        let start = Utc::now();
        for (i, symbol) in ["AAPL", "MSFT", "NVDA"].iter().enumerate() {
            let at = start + chrono::Duration::seconds(i as i64);
            let signal = Signal::hold(user.clone(), *symbol, 10.0, reasons::CONDITIONS_NOT_MET, None, at);
            store.insert_signal(&signal).await.unwrap();
        }
        let other = Signal::hold(UserId::new("u2"), "V", 10.0, reasons::PRICE_FILTER, None, start);
        store.insert_signal(&other).await.unwrap();

        let signals = store.recent_signals(&user, 2).await.unwrap();
        let symbols: Vec<&str> = signals.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["NVDA", "MSFT"]);
    }

    #[tokio::test]
    async fn test_latest_risk_metrics() {
        let store = store().await;
        let user = UserId::new("u1");
        let start = Utc::now();
        store.insert_risk_metrics(&metrics(&user, 100_000.0, start)).await.unwrap();
        store
            .insert_risk_metrics(&metrics(&user, 95_000.0, start + chrono::Duration::minutes(15)))
            .await
            .unwrap();

        let latest = store.latest_risk_metrics(&user).await.unwrap().unwrap();
        assert_eq!(latest.portfolio_value, 95_000.0);
        assert!(store.latest_risk_metrics(&UserId::new("u2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trading_preferences_and_auto_trading_users() {
        let store = store().await;
        let mut a = TradingPreferences::default_for(UserId::new("a"));
        let b = TradingPreferences::default_for(UserId::new("b"));
        a.toggle(true, Utc::now());
        store.save_trading_preferences(&a).await.unwrap();
        store.save_trading_preferences(&b).await.unwrap();

        assert_eq!(store.users_with_auto_trading().await.unwrap(), vec![UserId::new("a")]);

        a.force_stop(Utc::now());
        store.save_trading_preferences(&a).await.unwrap();
        assert!(store.users_with_auto_trading().await.unwrap().is_empty());

        let loaded = store.load_trading_preferences(&UserId::new("a")).await.unwrap().unwrap();
        assert_eq!(loaded, a);
    }

    #[tokio::test]
    async fn test_position_lifecycle_and_trades() {
        let store = store().await;
        let user = UserId::new("u1");
        let mut position = Position::open(user.clone(), "AAPL", PositionSide::Long, 10.0, 100.0, 100.0, Utc::now());
        store.upsert_position(&position).await.unwrap();
        assert_eq!(store.open_positions(&user).await.unwrap().len(), 1);

        position.close(110.0, Utc::now());
        store.upsert_position(&position).await.unwrap();
        assert!(store.open_positions(&user).await.unwrap().is_empty());

        let trade = Trade::new(
            user.clone(),
            "AAPL",
            OrderSide::Sell,
            10.0,
            110.0,
            "order-9",
            None,
            trade_reasons::TAKE_PROFIT,
            Utc::now(),
        );
        store.insert_trade(&trade).await.unwrap();
        let trades = store.recent_trades(&user, 5).await.unwrap();
        assert_eq!(trades, vec![trade]);
    }
}
