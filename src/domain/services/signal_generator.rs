//! Signal Generator
//!
//! One scan covers every symbol in the user's universe plus every symbol the
//! user currently holds. Each symbol is an independent future: its bars are
//! fetched, its indicators computed, an entry Signal is persisted (universe
//! symbols) and an exit decision is taken (held symbols). A failure on one
//! symbol is recorded in the [`ScanReport`] and never aborts the others.

use crate::domain::entities::position::Position;
use crate::domain::entities::price_bar::PriceBar;
use crate::domain::entities::signal::{reasons, Signal, SignalType};
use crate::domain::entities::strategy_config::{StrategyConfig, StrategyConfigUpdate};
use crate::domain::entities::trade::trade_reasons;
use crate::domain::entities::user::UserId;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::repositories::broker_client::{AccountSnapshot, BrokerClient, Timeframe};
use crate::domain::repositories::clock::Clock;
use crate::domain::repositories::engine_store::EngineStore;
use crate::domain::services::indicators::IndicatorSnapshot;
use crate::domain::services::position_sizer::PositionSizer;
use crate::domain::services::sectors::sector_for;
use crate::domain::value_objects::position_sizing::PositionSizingRequest;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Technical,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => trade_reasons::STOP_LOSS,
            ExitReason::TakeProfit => trade_reasons::TAKE_PROFIT,
            ExitReason::Technical => trade_reasons::TECHNICAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitDecision {
    pub should_sell: bool,
    pub reason: Option<ExitReason>,
}

impl ExitDecision {
    pub fn hold() -> Self {
        ExitDecision {
            should_sell: false,
            reason: None,
        }
    }

    fn sell(reason: ExitReason) -> Self {
        ExitDecision {
            should_sell: true,
            reason: Some(reason),
        }
    }
}

/// Exit rules for an open position, first match wins: stop-loss,
/// take-profit, then the technical vote. Without indicators only the price
/// rules can fire.
pub fn evaluate_exit(
    position: &Position,
    config: &StrategyConfig,
    indicators: Option<&IndicatorSnapshot>,
) -> ExitDecision {
    let change = position.price_change_percent();

    if change <= -config.stop_loss_percent {
        return ExitDecision::sell(ExitReason::StopLoss);
    }
    if change >= config.take_profit_percent {
        return ExitDecision::sell(ExitReason::TakeProfit);
    }
    match indicators {
        Some(snapshot) if snapshot.is_technical_sell() => ExitDecision::sell(ExitReason::Technical),
        _ => ExitDecision::hold(),
    }
}

/// An open position whose exit rule fired this scan
#[derive(Debug, Clone)]
pub struct ExitCandidate {
    pub position: Position,
    pub decision: ExitDecision,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: EngineError,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Persisted signals, one per universe symbol that could be recorded
    pub signals: Vec<Signal>,
    pub exits: Vec<ExitCandidate>,
    pub failures: Vec<SymbolFailure>,
}

impl ScanReport {
    /// Buy signals with a positive size, strongest conviction first
    pub fn actionable(&self) -> Vec<&Signal> {
        let mut buys: Vec<&Signal> = self.signals.iter().filter(|s| s.is_actionable()).collect();
        buys.sort_by(|a, b| {
            let sa = a.indicators.as_ref().map(|i| i.strength).unwrap_or(0.0);
            let sb = b.indicators.as_ref().map(|i| i.strength).unwrap_or(0.0);
            sb.total_cmp(&sa)
        });
        buys
    }

    pub fn count(&self, signal_type: SignalType) -> usize {
        self.signals
            .iter()
            .filter(|s| s.signal_type == signal_type)
            .count()
    }
}

#[derive(Debug, Default)]
struct SymbolScan {
    signal: Option<Signal>,
    exit: Option<ExitCandidate>,
    failure: Option<SymbolFailure>,
}

pub struct SignalGenerator {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn EngineStore>,
    clock: Arc<dyn Clock>,
    sizer: PositionSizer,
    timeframe: Timeframe,
    bar_lookback: usize,
}

impl SignalGenerator {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn EngineStore>,
        clock: Arc<dyn Clock>,
        timeframe: Timeframe,
        bar_lookback: usize,
    ) -> Self {
        Self {
            broker,
            store,
            clock,
            sizer: PositionSizer::new(),
            timeframe,
            bar_lookback,
        }
    }

    /// Stored config, defaults persisted on first access
    pub async fn strategy_config(&self, user: &UserId) -> EngineResult<StrategyConfig> {
        if let Some(config) = self.store.load_strategy_config(user).await? {
            return Ok(config);
        }
        let config = StrategyConfig::default_for(user.clone(), self.clock.now());
        self.store.save_strategy_config(&config).await?;
        info!("Created default strategy config for {}", user);
        Ok(config)
    }

    pub async fn update_strategy_config(
        &self,
        user: &UserId,
        update: StrategyConfigUpdate,
    ) -> EngineResult<StrategyConfig> {
        let current = self.strategy_config(user).await?;
        let next = current.apply(update, self.clock.now())?;
        self.store.save_strategy_config(&next).await?;
        info!("Strategy config updated for {}", user);
        Ok(next)
    }

    /// Scan the universe and the open positions. Never fails as a whole;
    /// per-symbol problems end up in `ScanReport::failures`.
    pub async fn scan(
        &self,
        user: &UserId,
        config: &StrategyConfig,
        account: &AccountSnapshot,
        open_positions: &[Position],
    ) -> ScanReport {
        let held: BTreeMap<&str, &Position> = open_positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| (p.symbol.as_str(), p))
            .collect();

        let symbols: BTreeSet<&str> = config
            .universe
            .iter()
            .map(String::as_str)
            .chain(held.keys().copied())
            .collect();

        let scans = join_all(symbols.into_iter().map(|symbol| {
            let in_universe = config.universe.contains(symbol);
            self.scan_symbol(user, config, account, symbol, held.get(symbol).copied(), in_universe)
        }))
        .await;

        let mut report = ScanReport::default();
        for scan in scans {
            report.signals.extend(scan.signal);
            report.exits.extend(scan.exit);
            report.failures.extend(scan.failure);
        }

        info!(
            "📡 Scan for {}: {} buy, {} hold, {} exits, {} failures",
            user,
            report.count(SignalType::Buy),
            report.count(SignalType::Hold),
            report.exits.len(),
            report.failures.len()
        );
        report
    }

    async fn scan_symbol(
        &self,
        user: &UserId,
        config: &StrategyConfig,
        account: &AccountSnapshot,
        symbol: &str,
        position: Option<&Position>,
        in_universe: bool,
    ) -> SymbolScan {
        let mut scan = SymbolScan::default();
        let limit = self.bar_lookback.max(config.required_bars());

        let bars = match self
            .broker
            .get_bars(user, symbol, self.timeframe, limit)
            .await
        {
            Ok(bars) => Some(bars),
            Err(e) => {
                warn!("Bars unavailable for {} ({}): {}", symbol, e.error_code(), e);
                scan.failure = Some(SymbolFailure {
                    symbol: symbol.to_string(),
                    error: e.into(),
                });
                None
            }
        };

        let snapshot = bars
            .as_deref()
            .filter(|b| b.len() >= config.required_bars())
            .and_then(|b| IndicatorSnapshot::compute(b, config));

        if let Some(position) = position {
            let last_close = bars.as_deref().and_then(|b| b.last()).map(|b| b.close);
            scan.exit = self.exit_candidate(position, config, snapshot.as_ref(), last_close);
        }

        if in_universe {
            let now = self.clock.now();
            let signal = match bars.as_deref() {
                Some(bars) => self.evaluate_entry(user, config, account, symbol, bars, now),
                None => Signal::hold(user.clone(), symbol, 0.0, reasons::DATA_UNAVAILABLE, None, now),
            };

            match self.store.insert_signal(&signal).await {
                Ok(()) => scan.signal = Some(signal),
                Err(e) => {
                    warn!("Failed to record signal for {}: {}", symbol, e);
                    scan.failure = Some(SymbolFailure {
                        symbol: symbol.to_string(),
                        error: e.into(),
                    });
                }
            }
        }

        scan
    }

    fn exit_candidate(
        &self,
        position: &Position,
        config: &StrategyConfig,
        snapshot: Option<&IndicatorSnapshot>,
        last_close: Option<f64>,
    ) -> Option<ExitCandidate> {
        let mut marked = position.clone();
        if let Some(price) = last_close.filter(|p| *p > 0.0) {
            marked.refresh(marked.quantity, marked.entry_price, price);
        }

        let decision = evaluate_exit(&marked, config, snapshot);
        if !decision.should_sell {
            return None;
        }

        debug!(
            "Exit fired for {} ({:?}, change {:.2}%)",
            marked.symbol,
            decision.reason,
            marked.price_change_percent()
        );
        let price = marked.current_price;
        Some(ExitCandidate {
            position: marked,
            decision,
            price,
        })
    }

    /// Entry decision for one symbol from its bar history. Always returns a
    /// signal; anything short of a sized buy is a hold with a reason code.
    pub fn evaluate_entry(
        &self,
        user: &UserId,
        config: &StrategyConfig,
        account: &AccountSnapshot,
        symbol: &str,
        bars: &[PriceBar],
        now: DateTime<Utc>,
    ) -> Signal {
        let last_price = bars.last().map(|b| b.close).unwrap_or(0.0);

        if bars.len() < config.required_bars() {
            return Signal::hold(user.clone(), symbol, last_price, reasons::INSUFFICIENT_DATA, None, now);
        }
        let Some(snapshot) = IndicatorSnapshot::compute(bars, config) else {
            return Signal::hold(user.clone(), symbol, last_price, reasons::INSUFFICIENT_DATA, None, now);
        };
        let price = snapshot.price;

        let hold = |reason: &str, snapshot: IndicatorSnapshot| {
            Signal::hold(user.clone(), symbol, price, reason, Some(snapshot), now)
        };

        if price < config.min_price || price > config.max_price {
            return hold(reasons::PRICE_FILTER, snapshot);
        }
        if snapshot.average_volume < config.min_average_volume {
            return hold(reasons::VOLUME_FILTER, snapshot);
        }
        if !config.preferred_sectors.is_empty() {
            let sector = sector_for(symbol);
            if !config
                .preferred_sectors
                .iter()
                .any(|s| s.eq_ignore_ascii_case(sector))
            {
                return hold(reasons::SECTOR_FILTER, snapshot);
            }
        }
        if !snapshot.is_buy() {
            return hold(reasons::CONDITIONS_NOT_MET, snapshot);
        }

        let request = PositionSizingRequest {
            symbol: symbol.to_string(),
            equity: account.equity.max(0.0),
            buying_power: account.buying_power.max(0.0),
            price,
            atr: snapshot.atr,
            atr_stop_multiplier: config.atr_stop_multiplier,
            atr_take_profit_multiplier: config.atr_take_profit_multiplier,
            risk_per_trade_percent: config.risk_per_trade_percent,
            max_position_size_percent: config.max_position_size_percent,
        };
        let sizing = match self.sizer.size_position(&request) {
            Ok(sizing) => sizing,
            Err(e) => {
                warn!("Sizing rejected for {}: {}", symbol, e);
                return hold(reasons::POSITION_SIZE_ZERO, snapshot);
            }
        };
        if sizing.shares == 0 {
            debug!("{} sized to zero ({:?})", symbol, sizing.limited_by);
            return hold(reasons::POSITION_SIZE_ZERO, snapshot);
        }

        debug!(
            "Buy {} x{} @ {:.2}: ${:.2} at risk to the stop, ${:.2} notional ({:?})",
            symbol,
            sizing.shares,
            price,
            sizing.risk_at_stop(price),
            sizing.notional_value(price),
            sizing.limited_by
        );
        let atr = snapshot.atr;
        Signal {
            signal_type: SignalType::Buy,
            stop_loss: sizing.stop_loss,
            take_profit: sizing.take_profit,
            position_size: sizing.shares,
            risk_amount: sizing.risk_amount,
            atr,
            ..Signal::hold(
                user.clone(),
                symbol,
                price,
                reasons::ENTRY_CONDITIONS_MET,
                Some(snapshot),
                now,
            )
        }
    }
}
