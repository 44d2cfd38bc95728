//! Trading Loop Actor
//!
//! One actor per user. The actor owns the user's cycle timer and is the only
//! writer of that user's trading preferences and positions: commands from the
//! API and scheduled cycles are handled one at a time from the same mailbox,
//! so a cycle never overlaps itself or a toggle.
//!
//! Emergency stop preempts cycles. The handle bumps the shared stop epoch
//! before queueing the command; the actor remembers the last epoch it has
//! handled. Any cycle that sees the two differ, whether it was already
//! running or started while the stop waited in the mailbox, submits no
//! further orders.

use crate::domain::entities::order::{OrderRequest, OrderSide};
use crate::domain::entities::position::{Position, PositionSide};
use crate::domain::entities::signal::Signal;
use crate::domain::entities::trade::{trade_reasons, Trade};
use crate::domain::entities::trading_preferences::{TradingPreferences, TradingStatus};
use crate::domain::entities::user::UserId;
use crate::domain::errors::{BrokerError, EngineError, EngineResult, ValidationError};
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::repositories::clock::Clock;
use crate::domain::repositories::engine_store::EngineStore;
use crate::domain::services::risk_engine::{Confirmation, EmergencyStopReport, RiskEngine};
use crate::domain::services::signal_generator::{ExitCandidate, SignalGenerator};
use crate::task_runner::{Backoff, BackoffConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Shared collaborators of every loop
#[derive(Clone)]
pub struct LoopContext {
    pub broker: Arc<dyn BrokerClient>,
    pub store: Arc<dyn EngineStore>,
    pub clock: Arc<dyn Clock>,
    pub signals: Arc<SignalGenerator>,
    pub risk: Arc<RiskEngine>,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(900),
        }
    }
}

/// Counters of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub signals: usize,
    pub buys_submitted: usize,
    pub exits_submitted: usize,
    pub orders_failed: usize,
    pub symbols_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Auto-trading disabled or paused
    Idle,
    /// A halting limit is breached; no orders this cycle
    Halted { breaches: Vec<String> },
    Completed(CycleSummary),
    /// An emergency stop arrived mid-cycle; remaining orders were dropped
    Preempted(CycleSummary),
}

/// What the status endpoint reports
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStatus {
    pub user_id: UserId,
    pub auto_trading_enabled: bool,
    pub trading_status: TradingStatus,
    pub last_toggle_time: Option<DateTime<Utc>>,
    pub halted: bool,
    pub breaches: Vec<String>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CycleOutcome>,
    pub consecutive_failures: u32,
}

impl LoopStatus {
    fn new(prefs: &TradingPreferences) -> Self {
        Self {
            user_id: prefs.user_id.clone(),
            auto_trading_enabled: prefs.auto_trading_enabled,
            trading_status: prefs.trading_status,
            last_toggle_time: prefs.last_toggle_time,
            halted: false,
            breaches: Vec::new(),
            last_cycle_at: None,
            last_outcome: None,
            consecutive_failures: 0,
        }
    }

    fn set_preferences(&mut self, prefs: &TradingPreferences) {
        self.auto_trading_enabled = prefs.auto_trading_enabled;
        self.trading_status = prefs.trading_status;
        self.last_toggle_time = prefs.last_toggle_time;
        if !prefs.is_trading() {
            self.halted = false;
            self.breaches.clear();
        }
    }
}

/// Messages that can be sent to the trading loop actor
#[derive(Debug)]
pub enum LoopCommand {
    /// Run a cycle now instead of waiting for the timer
    RunCycle {
        reply: oneshot::Sender<EngineResult<CycleOutcome>>,
    },
    Toggle {
        enabled: bool,
        reply: oneshot::Sender<EngineResult<TradingPreferences>>,
    },
    Pause {
        reply: oneshot::Sender<EngineResult<TradingPreferences>>,
    },
    Resume {
        reply: oneshot::Sender<EngineResult<TradingPreferences>>,
    },
    EmergencyStop {
        confirmation: Confirmation,
        /// Stop epoch this request raised
        epoch: u64,
        reply: oneshot::Sender<EngineResult<EmergencyStopReport>>,
    },
    Shutdown,
}

/// Cloneable handle to a running loop
#[derive(Clone)]
pub struct TradingLoopHandle {
    user: UserId,
    tx: mpsc::Sender<LoopCommand>,
    stop_epoch: Arc<AtomicU64>,
    status: watch::Receiver<LoopStatus>,
}

impl TradingLoopHandle {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<EngineResult<T>>) -> LoopCommand) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::LoopUnavailable(format!("trading loop for {} has stopped", self.user)))?;
        rx.await
            .map_err(|_| EngineError::LoopUnavailable(format!("trading loop for {} dropped the request", self.user)))?
    }

    pub async fn run_cycle(&self) -> EngineResult<CycleOutcome> {
        self.request(|reply| LoopCommand::RunCycle { reply }).await
    }

    pub async fn toggle(&self, enabled: bool) -> EngineResult<TradingPreferences> {
        self.request(|reply| LoopCommand::Toggle { enabled, reply }).await
    }

    pub async fn pause(&self) -> EngineResult<TradingPreferences> {
        self.request(|reply| LoopCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> EngineResult<TradingPreferences> {
        self.request(|reply| LoopCommand::Resume { reply }).await
    }

    pub async fn emergency_stop(&self, confirmation: Confirmation) -> EngineResult<EmergencyStopReport> {
        let epoch = self.stop_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.request(|reply| LoopCommand::EmergencyStop {
            confirmation,
            epoch,
            reply,
        })
        .await
    }

    pub async fn shutdown(&self) {
        if self.tx.send(LoopCommand::Shutdown).await.is_err() {
            debug!("Trading loop for {} already stopped", self.user);
        }
    }
}

pub struct TradingLoop {
    user: UserId,
    ctx: LoopContext,
    settings: LoopSettings,
    backoff: Backoff,
    stop_epoch: Arc<AtomicU64>,
    /// Highest stop epoch whose emergency stop has run
    handled_epoch: u64,
    status: watch::Sender<LoopStatus>,
}

impl TradingLoop {
    /// Spawn the loop for one user. Fails, and starts nothing, when the
    /// user's preferences cannot be read.
    pub async fn spawn(user: UserId, ctx: LoopContext, settings: LoopSettings) -> EngineResult<TradingLoopHandle> {
        let prefs = ctx
            .store
            .load_trading_preferences(&user)
            .await?
            .unwrap_or_else(|| TradingPreferences::default_for(user.clone()));

        let (tx, rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(LoopStatus::new(&prefs));
        let stop_epoch = Arc::new(AtomicU64::new(0));

        let actor = Self {
            user: user.clone(),
            backoff: Backoff::new(BackoffConfig::new(settings.interval, settings.max_backoff)),
            ctx,
            settings,
            stop_epoch: stop_epoch.clone(),
            handled_epoch: 0,
            status: status_tx,
        };

        tokio::spawn(async move {
            actor.run(rx).await;
        });

        info!(
            "Trading loop spawned for {} (auto-trading {})",
            user,
            if prefs.auto_trading_enabled { "on" } else { "off" }
        );
        Ok(TradingLoopHandle {
            user,
            tx,
            stop_epoch,
            status: status_rx,
        })
    }

    /// Main actor loop
    async fn run(mut self, mut rx: mpsc::Receiver<LoopCommand>) {
        info!("Trading loop {} started, interval {:?}", self.user, self.settings.interval);
        let mut next_run = Instant::now() + self.settings.interval;

        loop {
            tokio::select! {
                _ = sleep_until(next_run) => {
                    let result = self.run_cycle().await;
                    next_run = Instant::now() + self.next_delay(&result);
                }

                msg = rx.recv() => {
                    match msg {
                        Some(LoopCommand::RunCycle { reply }) => {
                            let result = self.run_cycle().await;
                            next_run = Instant::now() + self.next_delay(&result);
                            if reply.send(result).is_err() {
                                debug!("RunCycle caller for {} went away", self.user);
                            }
                        }
                        Some(LoopCommand::Toggle { enabled, reply }) => {
                            let result = self.toggle(enabled).await;
                            let _ = reply.send(result);
                        }
                        Some(LoopCommand::Pause { reply }) => {
                            let result = self.transition(TradingPreferences::pause).await;
                            let _ = reply.send(result);
                        }
                        Some(LoopCommand::Resume { reply }) => {
                            let result = self.transition(TradingPreferences::resume).await;
                            let _ = reply.send(result);
                        }
                        Some(LoopCommand::EmergencyStop { confirmation, epoch, reply }) => {
                            let result = self.emergency_stop(confirmation, epoch).await;
                            let _ = reply.send(result);
                        }
                        Some(LoopCommand::Shutdown) => {
                            info!("Trading loop {} received shutdown signal", self.user);
                            break;
                        }
                        None => {
                            debug!("All handles for {} dropped", self.user);
                            break;
                        }
                    }
                }
            }
        }

        info!("Trading loop {} stopped", self.user);
    }

    fn next_delay(&mut self, result: &EngineResult<CycleOutcome>) -> Duration {
        let task = format!("trading-loop:{}", self.user);
        let delay = match result {
            Ok(_) => self.backoff.record_success(&task),
            Err(_) => self.backoff.record_failure(&task),
        };
        let failures = self.backoff.consecutive_failures();
        self.status.send_modify(|s| s.consecutive_failures = failures);
        delay
    }

    async fn preferences(&self) -> EngineResult<TradingPreferences> {
        Ok(self
            .ctx
            .store
            .load_trading_preferences(&self.user)
            .await?
            .unwrap_or_else(|| TradingPreferences::default_for(self.user.clone())))
    }

    async fn toggle(&mut self, enabled: bool) -> EngineResult<TradingPreferences> {
        let mut prefs = self.preferences().await?;
        if prefs.toggle(enabled, self.ctx.clock.now()) {
            self.ctx.store.save_trading_preferences(&prefs).await?;
            info!(
                "📝 Auto-trading {} for {}",
                if enabled { "enabled" } else { "disabled" },
                self.user
            );
        } else {
            debug!("Auto-trading for {} already {}", self.user, enabled);
        }
        self.status.send_modify(|s| s.set_preferences(&prefs));
        Ok(prefs)
    }

    async fn transition(
        &mut self,
        apply: fn(&mut TradingPreferences) -> Result<(), ValidationError>,
    ) -> EngineResult<TradingPreferences> {
        let mut prefs = self.preferences().await?;
        apply(&mut prefs)?;
        self.ctx.store.save_trading_preferences(&prefs).await?;
        info!("Trading status for {} is now {}", self.user, prefs.trading_status.as_str());
        self.status.send_modify(|s| s.set_preferences(&prefs));
        Ok(prefs)
    }

    async fn emergency_stop(&mut self, confirmation: Confirmation, epoch: u64) -> EngineResult<EmergencyStopReport> {
        let result = self
            .ctx
            .risk
            .emergency_stop_all_positions(&self.user, confirmation)
            .await;
        // handled even on failure, or every later cycle would stay preempted
        self.handled_epoch = self.handled_epoch.max(epoch);

        match self.preferences().await {
            Ok(prefs) => self.status.send_modify(|s| s.set_preferences(&prefs)),
            Err(e) => error!("Could not reload preferences for {} after emergency stop: {}", self.user, e),
        }
        result
    }

    /// An emergency stop was requested that the actor has not run yet
    fn preempted(&self) -> bool {
        self.stop_epoch.load(Ordering::SeqCst) != self.handled_epoch
    }

    async fn run_cycle(&mut self) -> EngineResult<CycleOutcome> {
        let result = self.cycle().await;
        let now = self.ctx.clock.now();

        match &result {
            Ok(outcome) => {
                let outcome = outcome.clone();
                self.status.send_modify(|s| {
                    s.last_cycle_at = Some(now);
                    match &outcome {
                        CycleOutcome::Halted { breaches } => {
                            s.halted = true;
                            s.breaches = breaches.clone();
                        }
                        CycleOutcome::Completed(_) | CycleOutcome::Preempted(_) => {
                            s.halted = false;
                            s.breaches.clear();
                        }
                        CycleOutcome::Idle => {}
                    }
                    s.last_outcome = Some(outcome);
                });
            }
            Err(e) => error!("Trading cycle for {} failed: {}", self.user, e),
        }
        result
    }

    async fn cycle(&self) -> EngineResult<CycleOutcome> {
        let prefs = self.preferences().await?;
        self.status.send_modify(|s| s.set_preferences(&prefs));
        if !prefs.is_trading() {
            debug!("Skipping cycle for {}: {}", self.user, prefs.trading_status.as_str());
            return Ok(CycleOutcome::Idle);
        }
        if self.preempted() {
            return Ok(self.abandon(CycleSummary::default()));
        }

        let mut open = self.sync_positions().await?;

        // Risk gate: completes before any order of this cycle
        self.ctx.risk.calculate_risk_metrics(&self.user).await?;
        let breaches = self.ctx.risk.check_risk_limit_breaches(&self.user).await?;
        if breaches.should_halt_trading {
            let names: Vec<String> = breaches.names().into_iter().map(str::to_string).collect();
            warn!("🛑 Trading halted for {}: {}", self.user, names.join(", "));
            return Ok(CycleOutcome::Halted { breaches: names });
        }

        let config = self.ctx.signals.strategy_config(&self.user).await?;
        let account = self.ctx.broker.get_account(&self.user).await?;
        let report = self.ctx.signals.scan(&self.user, &config, &account, &open).await;

        let mut summary = CycleSummary {
            signals: report.signals.len(),
            symbols_failed: report.failures.len(),
            ..Default::default()
        };

        for exit in &report.exits {
            if self.preempted() {
                return Ok(self.abandon(summary));
            }
            match self.submit_exit(exit).await {
                Ok(()) => {
                    summary.exits_submitted += 1;
                    open.retain(|p| p.id != exit.position.id);
                }
                Err(_) => summary.orders_failed += 1,
            }
        }

        let mut held: BTreeSet<String> = open.iter().map(|p| p.symbol.clone()).collect();
        let mut buying_power = account.buying_power;

        for signal in report.actionable() {
            if held.contains(&signal.symbol) {
                debug!("Already holding {}, skipping signal {}", signal.symbol, signal.id);
                continue;
            }
            if held.len() >= config.max_open_positions {
                info!(
                    "Max open positions ({}) reached for {}, skipping remaining signals",
                    config.max_open_positions, self.user
                );
                break;
            }
            let notional = signal.position_size as f64 * signal.price;
            if notional > buying_power {
                info!(
                    "Skipping {}: needs ${:.2}, ${:.2} buying power left",
                    signal.symbol, notional, buying_power
                );
                continue;
            }
            if self.preempted() {
                return Ok(self.abandon(summary));
            }

            match self.submit_entry(signal).await {
                Ok(()) => {
                    summary.buys_submitted += 1;
                    buying_power -= notional;
                    held.insert(signal.symbol.clone());
                }
                Err(_) => summary.orders_failed += 1,
            }
        }

        info!(
            "Cycle for {} done: {} signals, {} buys, {} exits, {} failed orders",
            self.user, summary.signals, summary.buys_submitted, summary.exits_submitted, summary.orders_failed
        );
        Ok(CycleOutcome::Completed(summary))
    }

    fn abandon(&self, summary: CycleSummary) -> CycleOutcome {
        warn!("🛑 Emergency stop pending for {}, abandoning remaining orders", self.user);
        CycleOutcome::Preempted(summary)
    }

    /// Mirror brokerage positions into the store. Stored open positions the
    /// brokerage no longer reports are closed at their last known price.
    async fn sync_positions(&self) -> EngineResult<Vec<Position>> {
        let now = self.ctx.clock.now();
        let reported = self.ctx.broker.get_positions(&self.user).await?;
        let stored = self.ctx.store.open_positions(&self.user).await?;

        let mut open = Vec::with_capacity(reported.len());
        for broker_position in &reported {
            let position = match stored.iter().find(|p| p.symbol == broker_position.symbol) {
                Some(existing) => {
                    let mut position = existing.clone();
                    position.refresh(
                        broker_position.quantity,
                        broker_position.avg_entry_price,
                        broker_position.current_price,
                    );
                    position
                }
                None => Position::open(
                    self.user.clone(),
                    broker_position.symbol.clone(),
                    broker_position.side,
                    broker_position.quantity,
                    broker_position.avg_entry_price,
                    broker_position.current_price,
                    now,
                ),
            };
            self.ctx.store.upsert_position(&position).await?;
            open.push(position);
        }

        for gone in stored
            .iter()
            .filter(|p| !reported.iter().any(|b| b.symbol == p.symbol))
        {
            let mut position = gone.clone();
            let price = position.current_price;
            position.close(price, now);
            self.ctx.store.upsert_position(&position).await?;
            info!("Position {} for {} closed outside the engine", position.symbol, self.user);
        }

        Ok(open)
    }

    async fn submit_exit(&self, exit: &ExitCandidate) -> Result<(), BrokerError> {
        let symbol = &exit.position.symbol;
        let reason = exit.decision.reason.map(|r| r.as_str()).unwrap_or(trade_reasons::TECHNICAL);

        let ack = match self.ctx.broker.close_position(&self.user, symbol).await {
            Ok(ack) => ack,
            Err(e) => {
                log_order_failure(&self.user, symbol, None, &e);
                return Err(e);
            }
        };

        let now = self.ctx.clock.now();
        let price = ack.filled_price.unwrap_or(exit.price);
        let mut position = exit.position.clone();
        let realized = position.close(price, now).unwrap_or_default();
        info!(
            "📉 Exit {} {} @ {:.2} ({}, realized ${:.2})",
            position.quantity, symbol, price, reason, realized
        );

        if let Err(e) = self.ctx.store.upsert_position(&position).await {
            error!("Failed to record close of {}: {}", symbol, e);
        }
        let trade = Trade::new(
            self.user.clone(),
            symbol.clone(),
            position.side.closing_side(),
            position.quantity,
            price,
            ack.order_id,
            None,
            reason,
            now,
        );
        if let Err(e) = self.ctx.store.insert_trade(&trade).await {
            error!("Failed to record exit trade for {}: {}", symbol, e);
        }
        Ok(())
    }

    /// Submit a bracket buy. The signal is marked executed only once the
    /// brokerage has acknowledged the order.
    async fn submit_entry(&self, signal: &Signal) -> Result<(), BrokerError> {
        let order = OrderRequest::bracket_buy(
            signal.symbol.clone(),
            signal.position_size,
            signal.price,
            signal.stop_loss,
            signal.take_profit,
        )
        .map_err(|e| BrokerError::OrderRejected(e.to_string()))?;

        let ack = match self.ctx.broker.submit_order(&self.user, &order).await {
            Ok(ack) => ack,
            Err(e) => {
                log_order_failure(&self.user, &signal.symbol, Some(&signal.id), &e);
                return Err(e);
            }
        };

        let now = self.ctx.clock.now();
        let price = ack.filled_price.unwrap_or(signal.price);
        info!(
            "📈 Bought {} {} @ {:.2} (stop {:.2}, target {:.2}, order {})",
            signal.position_size, signal.symbol, price, signal.stop_loss, signal.take_profit, ack.order_id
        );

        match self
            .ctx
            .store
            .mark_signal_executed(&signal.id, &ack.order_id, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Signal {} was already marked executed", signal.id),
            Err(e) => error!("Failed to mark signal {} executed: {}", signal.id, e),
        }

        let quantity = signal.position_size as f64;
        let position = Position::open(
            self.user.clone(),
            signal.symbol.clone(),
            PositionSide::Long,
            quantity,
            price,
            price,
            now,
        );
        if let Err(e) = self.ctx.store.upsert_position(&position).await {
            error!("Failed to record position for {}: {}", signal.symbol, e);
        }
        let trade = Trade::new(
            self.user.clone(),
            signal.symbol.clone(),
            OrderSide::Buy,
            quantity,
            price,
            ack.order_id,
            Some(signal.id.clone()),
            trade_reasons::ENTRY,
            now,
        );
        if let Err(e) = self.ctx.store.insert_trade(&trade).await {
            error!("Failed to record entry trade for {}: {}", signal.symbol, e);
        }
        Ok(())
    }
}

fn log_order_failure(user: &UserId, symbol: &str, signal_id: Option<&str>, e: &BrokerError) {
    let signal = signal_id.unwrap_or("-");
    if e.is_transient() {
        warn!(
            "Order for {} ({}) deferred to next cycle [signal {}]: {}",
            symbol, user, signal, e
        );
    } else {
        error!(
            "Order for {} ({}) rejected ({}) [signal {}]: {}",
            symbol,
            user,
            e.error_code(),
            signal,
            e
        );
    }
}
