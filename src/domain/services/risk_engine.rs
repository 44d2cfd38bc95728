//! Risk Engine
//!
//! Computes portfolio risk snapshots, owns the per-user limits, evaluates
//! breaches and runs the emergency liquidation. All collaborators are
//! injected, so tests drive it with the paper broker, the in-memory store
//! and a fixed clock.

use crate::domain::entities::position::{Position, PositionSide};
use crate::domain::entities::price_bar::returns;
use crate::domain::entities::risk_limits::{LimitKind, LimitUnit, RiskLimits, RiskLimitsUpdate};
use crate::domain::entities::risk_metrics::RiskMetrics;
use crate::domain::entities::trade::{trade_reasons, Trade};
use crate::domain::entities::trading_preferences::TradingPreferences;
use crate::domain::entities::user::UserId;
use crate::domain::errors::{EngineResult, ValidationError};
use crate::domain::repositories::broker_client::{BrokerClient, BrokerPosition, Timeframe};
use crate::domain::repositories::clock::Clock;
use crate::domain::repositories::engine_store::EngineStore;
use crate::domain::services::risk_calculator::{self, PortfolioInputs};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Proof that the caller typed the emergency-stop confirmation. Can only be
/// built from the exact literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation(());

impl Confirmation {
    pub const TOKEN: &'static str = "CONFIRM";

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if value == Self::TOKEN {
            Ok(Confirmation(()))
        } else {
            Err(ValidationError::ConfirmationRequired)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breach {
    pub limit: LimitKind,
    pub current: f64,
    pub threshold: f64,
    pub halts_trading: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachReport {
    pub breached: bool,
    pub breaches: Vec<Breach>,
    pub should_halt_trading: bool,
}

impl BreachReport {
    pub fn names(&self) -> Vec<&'static str> {
        self.breaches.iter().map(|b| b.limit.name()).collect()
    }
}

/// Compare every enabled limit with the metrics. Loss-type limits only
/// breach on an actual loss.
pub fn evaluate_breaches(
    limits: &RiskLimits,
    metrics: &RiskMetrics,
    open_positions: &[Position],
) -> BreachReport {
    let worst_position_loss = open_positions
        .iter()
        .filter(|p| p.is_open())
        .map(|p| -p.unrealized_pl_percent)
        .fold(0.0_f64, f64::max);

    let mut breaches = Vec::new();
    for kind in LimitKind::ALL {
        let setting = limits.setting(kind);
        if !setting.enabled {
            continue;
        }

        let (current, requires_loss) = match kind {
            LimitKind::DailyLossLimit => match setting.unit {
                LimitUnit::Percentage => (metrics.daily_loss_percent(), true),
                LimitUnit::Dollar => (metrics.daily_loss_amount(), true),
            },
            LimitKind::DailyLossThreshold => (metrics.daily_loss_percent(), true),
            LimitKind::PortfolioDrawdownLimit | LimitKind::DrawdownThreshold => {
                (metrics.current_drawdown, true)
            }
            LimitKind::PositionLossThreshold => (worst_position_loss, true),
            LimitKind::VolatilityThreshold => (metrics.volatility_index, false),
        };

        if requires_loss && current <= 0.0 {
            continue;
        }
        if current < setting.value {
            continue;
        }

        let unit = match setting.unit {
            LimitUnit::Percentage => "%",
            LimitUnit::Dollar => "$",
        };
        breaches.push(Breach {
            limit: kind,
            current,
            threshold: setting.value,
            halts_trading: limits.halts_on(kind),
            message: format!(
                "{} breached: {:.2}{} >= {:.2}{}",
                kind.name(),
                current,
                unit,
                setting.value,
                unit
            ),
        });
    }

    let should_halt_trading = breaches.iter().any(|b| b.halts_trading);
    BreachReport {
        breached: !breaches.is_empty(),
        breaches,
        should_halt_trading,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseFailure {
    pub symbol: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyStopReport {
    pub closed_positions: usize,
    pub total_positions: usize,
    pub failures: Vec<CloseFailure>,
    pub auto_trading_enabled: bool,
}

pub struct RiskEngine {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn EngineStore>,
    clock: Arc<dyn Clock>,
    timeframe: Timeframe,
    correlation_lookback: usize,
}

impl RiskEngine {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn EngineStore>,
        clock: Arc<dyn Clock>,
        timeframe: Timeframe,
        correlation_lookback: usize,
    ) -> Self {
        Self {
            broker,
            store,
            clock,
            timeframe,
            correlation_lookback,
        }
    }

    /// Fresh snapshot from the brokerage account and positions. Appends to
    /// the history; prior snapshots are only read.
    pub async fn calculate_risk_metrics(&self, user: &UserId) -> EngineResult<RiskMetrics> {
        let account = self.broker.get_account(user).await?;
        let positions = self.broker.get_positions(user).await?;
        let previous = self.store.latest_risk_metrics(user).await?;
        let history = self.return_history(user, &positions).await;

        let inputs = PortfolioInputs {
            account: &account,
            positions: &positions,
            returns: &history,
            previous: previous.as_ref(),
        };
        let metrics = risk_calculator::calculate(
            uuid::Uuid::new_v4().to_string(),
            user.clone(),
            &inputs,
            self.clock.now(),
        );

        self.store.insert_risk_metrics(&metrics).await?;
        info!(
            "📊 Risk metrics for {}: value ${:.2}, exposure {:.1}%, drawdown {:.2}%, vol {:.1}",
            user,
            metrics.portfolio_value,
            metrics.current_risk_exposure,
            metrics.current_drawdown,
            metrics.volatility_index
        );
        Ok(metrics)
    }

    async fn return_history(
        &self,
        user: &UserId,
        positions: &[BrokerPosition],
    ) -> BTreeMap<String, Vec<f64>> {
        let limit = self.correlation_lookback + 1;
        let fetches = positions.iter().map(|p| async move {
            let bars = self
                .broker
                .get_bars(user, &p.symbol, self.timeframe, limit)
                .await;
            (p.symbol.clone(), bars)
        });

        let mut history = BTreeMap::new();
        for (symbol, bars) in join_all(fetches).await {
            match bars {
                Ok(bars) if bars.len() >= 3 => {
                    history.insert(symbol, returns(&bars));
                }
                Ok(_) => warn!("Not enough history for {} in correlation", symbol),
                Err(e) => warn!("Excluding {} from correlation: {}", symbol, e),
            }
        }
        history
    }

    /// Latest snapshot, or a fresh one if none exists yet
    pub async fn get_risk_metrics(&self, user: &UserId) -> EngineResult<RiskMetrics> {
        match self.store.latest_risk_metrics(user).await? {
            Some(metrics) => Ok(metrics),
            None => self.calculate_risk_metrics(user).await,
        }
    }

    /// Stored limits, defaults persisted on first access
    pub async fn get_risk_limits(&self, user: &UserId) -> EngineResult<RiskLimits> {
        if let Some(limits) = self.store.load_risk_limits(user).await? {
            return Ok(limits);
        }
        let limits = RiskLimits::default_for(user.clone(), self.clock.now());
        self.store.save_risk_limits(&limits).await?;
        Ok(limits)
    }

    pub async fn update_risk_limits(
        &self,
        user: &UserId,
        update: &RiskLimitsUpdate,
    ) -> EngineResult<RiskLimits> {
        let current = self.get_risk_limits(user).await?;
        let next = current.apply(update, self.clock.now())?;
        self.store.save_risk_limits(&next).await?;
        info!("Risk limits updated for {}", user);
        Ok(next)
    }

    /// Evaluate enabled limits against the latest snapshot
    pub async fn check_risk_limit_breaches(&self, user: &UserId) -> EngineResult<BreachReport> {
        let limits = self.get_risk_limits(user).await?;
        let metrics = self.get_risk_metrics(user).await?;
        let positions = self.store.open_positions(user).await?;

        let report = evaluate_breaches(&limits, &metrics, &positions);
        if report.breached {
            warn!(
                "⚠️ Risk limits breached for {}: {:?} (halt: {})",
                user,
                report.names(),
                report.should_halt_trading
            );
        }
        Ok(report)
    }

    /// Market-close every open position and disable auto-trading. Trading is
    /// disabled even when some closes fail; failed closes are reported, not
    /// retried.
    pub async fn emergency_stop_all_positions(
        &self,
        user: &UserId,
        _confirmation: Confirmation,
    ) -> EngineResult<EmergencyStopReport> {
        warn!("🛑 EMERGENCY STOP requested for {}", user);

        let stored = self.store.open_positions(user).await.unwrap_or_else(|e| {
            error!("Could not load stored positions for {}: {}", user, e);
            Vec::new()
        });

        let targets: Vec<(String, f64, f64, PositionSide)> = match self.broker.get_positions(user).await {
            Ok(positions) => positions
                .into_iter()
                .map(|p| (p.symbol, p.quantity, p.current_price, p.side))
                .collect(),
            Err(e) => {
                warn!("Broker positions unavailable ({}), using stored positions", e);
                stored
                    .iter()
                    .map(|p| (p.symbol.clone(), p.quantity, p.current_price, p.side))
                    .collect()
            }
        };

        let closes = join_all(targets.iter().map(|(symbol, ..)| async move {
            (symbol, self.broker.close_position(user, symbol).await)
        }))
        .await;

        let now = self.clock.now();
        let mut closed = 0;
        let mut failures = Vec::new();
        for ((symbol, ack), (_, quantity, last_price, side)) in closes.into_iter().zip(&targets) {
            match ack {
                Ok(ack) => {
                    closed += 1;
                    let price = ack.filled_price.unwrap_or(*last_price);
                    info!("Closed {} {} @ {:.2} (order {})", quantity, symbol, price, ack.order_id);

                    if let Some(position) = stored.iter().find(|p| &p.symbol == symbol) {
                        let mut position = position.clone();
                        position.close(price, now);
                        if let Err(e) = self.store.upsert_position(&position).await {
                            error!("Failed to record close of {}: {}", symbol, e);
                        }
                    }
                    let trade = Trade::new(
                        user.clone(),
                        symbol.clone(),
                        side.closing_side(),
                        *quantity,
                        price,
                        ack.order_id,
                        None,
                        trade_reasons::EMERGENCY_STOP,
                        now,
                    );
                    if let Err(e) = self.store.insert_trade(&trade).await {
                        error!("Failed to record emergency trade for {}: {}", symbol, e);
                    }
                }
                Err(e) => {
                    error!("Failed to close {} ({}): {}", symbol, e.error_code(), e);
                    failures.push(CloseFailure {
                        symbol: symbol.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut prefs = self
            .store
            .load_trading_preferences(user)
            .await?
            .unwrap_or_else(|| TradingPreferences::default_for(user.clone()));
        prefs.force_stop(now);
        self.store.save_trading_preferences(&prefs).await?;

        warn!(
            "🛑 Emergency stop for {}: closed {}/{} positions, auto-trading disabled",
            user,
            closed,
            targets.len()
        );

        Ok(EmergencyStopReport {
            closed_positions: closed,
            total_positions: targets.len(),
            failures,
            auto_trading_enabled: prefs.auto_trading_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::risk_limits::LimitSettingUpdate;
    use crate::domain::entities::trading_preferences::TradingStatus;
    use crate::domain::errors::{BrokerError, EngineError};
    use crate::domain::repositories::broker_client::AccountSnapshot;
    use crate::domain::repositories::clock::FixedClock;
    use crate::infrastructure::paper_broker::PaperBroker;
    use crate::persistence::memory_store::InMemoryStore;
    use chrono::{TimeZone, Utc};

    fn user() -> UserId {
        UserId::new("trader-1")
    }

    fn setup() -> (Arc<PaperBroker>, Arc<InMemoryStore>, RiskEngine) {
        let broker = Arc::new(PaperBroker::new(100_000.0));
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap(),
        ));
        let engine = RiskEngine::new(broker.clone(), store.clone(), clock, Timeframe::Day, 30);
        (broker, store, engine)
    }

    fn metrics(daily_pnl_percent: f64, drawdown: f64, volatility: f64) -> RiskMetrics {
        RiskMetrics {
            id: "m".to_string(),
            user_id: user(),
            current_risk_exposure: 50.0,
            portfolio_value: 100_000.0,
            cash_available: 50_000.0,
            daily_pnl: daily_pnl_percent * 1_000.0,
            daily_pnl_percent,
            peak_portfolio_value: 100_000.0,
            current_drawdown: drawdown,
            max_drawdown: drawdown,
            sector_concentration: vec![],
            position_concentration: vec![],
            correlation_matrix: Default::default(),
            volatility_index: volatility,
            calculated_at: Utc::now(),
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits::default_for(user(), Utc::now())
    }

    #[test]
    fn test_confirmation_requires_exact_literal() {
        assert!(Confirmation::parse("CONFIRM").is_ok());
        assert_eq!(
            Confirmation::parse("confirm"),
            Err(ValidationError::ConfirmationRequired)
        );
        assert!(Confirmation::parse("CONFIRM ").is_err());
        assert!(Confirmation::parse("").is_err());
    }

    #[test]
    fn test_no_breach_on_gain() {
        let report = evaluate_breaches(&limits(), &metrics(2.0, 0.0, 10.0), &[]);
        assert!(!report.breached);
        assert!(!report.should_halt_trading);
    }

    #[test]
    fn test_daily_loss_breach_halts() {
        let report = evaluate_breaches(&limits(), &metrics(-6.0, 0.0, 0.0), &[]);
        assert!(report.breached);
        assert_eq!(report.names(), vec!["dailyLossLimit"]);
        assert!(report.should_halt_trading);
    }

    #[test]
    fn test_breach_without_halt_flag_does_not_halt() {
        let mut limits = limits();
        limits.halt_trading_on_daily_limit = false;
        let report = evaluate_breaches(&limits, &metrics(-6.0, 0.0, 0.0), &[]);
        assert!(report.breached);
        assert!(!report.should_halt_trading);
        assert!(!report.breaches[0].halts_trading);
    }

    #[test]
    fn test_drawdown_breach() {
        let mut limits = limits();
        limits.halt_trading_on_daily_limit = false;
        let report = evaluate_breaches(&limits, &metrics(0.0, 16.0, 0.0), &[]);
        assert_eq!(report.names(), vec!["portfolioDrawdownLimit"]);
        assert!(report.should_halt_trading);
    }

    #[test]
    fn test_disabled_limits_are_skipped() {
        // volatility threshold is disabled by default
        let report = evaluate_breaches(&limits(), &metrics(0.0, 0.0, 90.0), &[]);
        assert!(!report.breached);

        let mut limits = limits();
        limits.volatility_threshold.enabled = true;
        let report = evaluate_breaches(&limits, &metrics(0.0, 0.0, 90.0), &[]);
        assert_eq!(report.names(), vec!["volatilityThreshold"]);
        assert!(!report.should_halt_trading);
    }

    #[test]
    fn test_position_loss_never_halts() {
        let position = Position::open(user(), "AAPL", PositionSide::Long, 10.0, 100.0, 85.0, Utc::now());
        let report = evaluate_breaches(&limits(), &metrics(0.0, 0.0, 0.0), &[position]);
        assert_eq!(report.names(), vec!["positionLossThreshold"]);
        assert!((report.breaches[0].current - 15.0).abs() < 1e-9);
        assert!(!report.should_halt_trading);
    }

    #[test]
    fn test_dollar_daily_loss_limit() {
        let mut limits = limits();
        limits.daily_loss_limit = crate::domain::entities::risk_limits::LimitSetting {
            value: 1_500.0,
            enabled: true,
            unit: LimitUnit::Dollar,
        };
        // 2% of 100k = $2000 lost
        let report = evaluate_breaches(&limits, &metrics(-2.0, 0.0, 0.0), &[]);
        assert_eq!(report.names(), vec!["dailyLossLimit"]);
    }

    #[tokio::test]
    async fn test_limits_created_lazily_and_round_trip() {
        let (_, store, engine) = setup();
        assert!(store.load_risk_limits(&user()).await.unwrap().is_none());

        let limits = engine.get_risk_limits(&user()).await.unwrap();
        assert_eq!(limits.daily_loss_limit.value, 5.0);
        assert!(store.load_risk_limits(&user()).await.unwrap().is_some());

        let update: RiskLimitsUpdate =
            serde_json::from_str(r#"{"dailyLossLimit": {"value": 5}}"#).unwrap();
        engine.update_risk_limits(&user(), &update).await.unwrap();
        let reread = engine.get_risk_limits(&user()).await.unwrap();
        assert_eq!(reread.daily_loss_limit.value, 5.0);

        let bad = RiskLimitsUpdate {
            daily_loss_limit: Some(LimitSettingUpdate {
                value: Some(-1.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = engine.update_risk_limits(&user(), &bad).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(engine.get_risk_limits(&user()).await.unwrap().daily_loss_limit.value, 5.0);
    }

    #[tokio::test]
    async fn test_metrics_history_is_append_only() {
        let (broker, store, engine) = setup();
        broker
            .set_account(
                &user(),
                AccountSnapshot {
                    equity: 100_000.0,
                    cash: 100_000.0,
                    buying_power: 100_000.0,
                    last_equity: 100_000.0,
                },
            )
            .await;

        let first = engine.get_risk_metrics(&user()).await.unwrap();
        let again = engine.get_risk_metrics(&user()).await.unwrap();
        assert_eq!(first.id, again.id);

        broker
            .set_account(
                &user(),
                AccountSnapshot {
                    equity: 80_000.0,
                    cash: 80_000.0,
                    buying_power: 80_000.0,
                    last_equity: 100_000.0,
                },
            )
            .await;
        let second = engine.calculate_risk_metrics(&user()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.peak_portfolio_value, 100_000.0);
        assert!((second.current_drawdown - 20.0).abs() < 1e-9);
        assert_eq!(store.metrics_count(&user()).await, 2);

        let report = engine.check_risk_limit_breaches(&user()).await.unwrap();
        assert!(report.should_halt_trading);
        assert!(report.names().contains(&"portfolioDrawdownLimit"));
        assert!(report.names().contains(&"dailyLossLimit"));
    }

    #[tokio::test]
    async fn test_emergency_stop_closes_and_disables() {
        let (broker, store, engine) = setup();
        broker.set_price("AAPL", 100.0).await;
        broker.set_price("MSFT", 300.0).await;
        broker.seed_position(&user(), "AAPL", 10.0, 100.0).await;
        broker.seed_position(&user(), "MSFT", 5.0, 300.0).await;

        let mut prefs = TradingPreferences::default_for(user());
        prefs.toggle(true, Utc::now());
        store.save_trading_preferences(&prefs).await.unwrap();

        let report = engine
            .emergency_stop_all_positions(&user(), Confirmation::parse("CONFIRM").unwrap())
            .await
            .unwrap();

        assert_eq!(report.closed_positions, 2);
        assert_eq!(report.total_positions, 2);
        assert!(report.failures.is_empty());
        assert!(broker.get_positions(&user()).await.unwrap().is_empty());

        let prefs = store.load_trading_preferences(&user()).await.unwrap().unwrap();
        assert!(!prefs.auto_trading_enabled);
        assert_eq!(prefs.trading_status, TradingStatus::Stopped);
        assert_eq!(store.recent_trades(&user(), 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_emergency_stop_partial_failure_still_disables() {
        let (broker, store, engine) = setup();
        broker.set_price("AAPL", 100.0).await;
        broker.set_price("MSFT", 300.0).await;
        broker.seed_position(&user(), "AAPL", 10.0, 100.0).await;
        broker.seed_position(&user(), "MSFT", 5.0, 300.0).await;
        broker
            .fail_orders_for("MSFT", BrokerError::OrderRejected("halted".to_string()))
            .await;

        let mut prefs = TradingPreferences::default_for(user());
        prefs.toggle(true, Utc::now());
        store.save_trading_preferences(&prefs).await.unwrap();

        let report = engine
            .emergency_stop_all_positions(&user(), Confirmation::parse("CONFIRM").unwrap())
            .await
            .unwrap();

        assert_eq!(report.closed_positions, 1);
        assert_eq!(report.total_positions, 2);
        assert_eq!(report.failures[0].symbol, "MSFT");
        assert!(!report.auto_trading_enabled);

        let prefs = store.load_trading_preferences(&user()).await.unwrap().unwrap();
        assert!(!prefs.auto_trading_enabled);
    }

    #[tokio::test]
    async fn test_emergency_stop_falls_back_to_stored_positions() {
        let (broker, store, engine) = setup();
        broker.set_price("AAPL", 100.0).await;
        broker.seed_position(&user(), "AAPL", 10.0, 100.0).await;
        broker
            .fail_positions(Some(BrokerError::Network("reset".to_string())))
            .await;

        let stored = Position::open(user(), "AAPL", PositionSide::Long, 10.0, 100.0, 100.0, Utc::now());
        store.upsert_position(&stored).await.unwrap();

        let report = engine
            .emergency_stop_all_positions(&user(), Confirmation::parse("CONFIRM").unwrap())
            .await
            .unwrap();
        assert_eq!(report.closed_positions, 1);
        assert!(store.open_positions(&user()).await.unwrap().is_empty());
    }
}
