//! Trading Engine
//!
//! Entry point of the API layer. Owns the registry of per-user trading loops
//! and routes each operation either to the user's loop (anything that writes
//! preferences or positions) or straight to the stateless domain services.

use crate::application::actors::trading_loop::{
    LoopContext, LoopSettings, LoopStatus, TradingLoop, TradingLoopHandle,
};
use crate::domain::entities::risk_limits::{RiskLimits, RiskLimitsUpdate};
use crate::domain::entities::risk_metrics::RiskMetrics;
use crate::domain::entities::signal::Signal;
use crate::domain::entities::strategy_config::{StrategyConfig, StrategyConfigUpdate};
use crate::domain::entities::trading_preferences::TradingPreferences;
use crate::domain::entities::user::UserId;
use crate::domain::errors::EngineResult;
use crate::domain::services::risk_engine::{BreachReport, Confirmation, EmergencyStopReport};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SIGNAL_LIMIT: usize = 50;
pub const MAX_SIGNAL_LIMIT: usize = 500;

pub struct TradingEngine {
    ctx: LoopContext,
    settings: LoopSettings,
    loops: RwLock<HashMap<UserId, TradingLoopHandle>>,
}

impl TradingEngine {
    pub fn new(ctx: LoopContext, settings: LoopSettings) -> Self {
        Self {
            ctx,
            settings,
            loops: RwLock::new(HashMap::new()),
        }
    }

    /// The user's loop, spawned on first use
    pub async fn loop_for(&self, user: &UserId) -> EngineResult<TradingLoopHandle> {
        {
            let loops = self.loops.read().await;
            if let Some(handle) = loops.get(user).filter(|h| !h.is_closed()) {
                return Ok(handle.clone());
            }
        }

        // spawning reads the store; other users must not wait on it
        let handle = TradingLoop::spawn(user.clone(), self.ctx.clone(), self.settings.clone()).await?;

        let existing = {
            let mut loops = self.loops.write().await;
            match loops.get(user).filter(|h| !h.is_closed()) {
                Some(winner) => Some(winner.clone()),
                None => {
                    loops.insert(user.clone(), handle.clone());
                    None
                }
            }
        };
        match existing {
            Some(winner) => {
                debug!("Trading loop for {} spawned concurrently, keeping the first", user);
                handle.shutdown().await;
                Ok(winner)
            }
            None => Ok(handle),
        }
    }

    /// Start loops for every user who left auto-trading on
    pub async fn resume_enabled_users(&self) -> EngineResult<usize> {
        let users = self.ctx.store.users_with_auto_trading().await?;
        let mut started = 0;
        for user in &users {
            match self.loop_for(user).await {
                Ok(_) => started += 1,
                Err(e) => error!("Could not start trading loop for {}: {}", user, e),
            }
        }
        info!("Resumed {}/{} auto-trading loops", started, users.len());
        Ok(started)
    }

    pub async fn shutdown(&self) {
        let loops: Vec<TradingLoopHandle> = self.loops.write().await.drain().map(|(_, h)| h).collect();
        info!("Shutting down {} trading loops...", loops.len());
        for handle in loops {
            handle.shutdown().await;
        }
    }

    pub async fn toggle_auto_trading(&self, user: &UserId, enabled: bool) -> EngineResult<TradingPreferences> {
        self.loop_for(user).await?.toggle(enabled).await
    }

    pub async fn pause_trading(&self, user: &UserId) -> EngineResult<TradingPreferences> {
        self.loop_for(user).await?.pause().await
    }

    pub async fn resume_trading(&self, user: &UserId) -> EngineResult<TradingPreferences> {
        self.loop_for(user).await?.resume().await
    }

    pub async fn auto_trading_status(&self, user: &UserId) -> EngineResult<LoopStatus> {
        Ok(self.loop_for(user).await?.status())
    }

    pub async fn emergency_stop(
        &self,
        user: &UserId,
        confirmation: Confirmation,
    ) -> EngineResult<EmergencyStopReport> {
        match self.loop_for(user).await {
            Ok(handle) => handle.emergency_stop(confirmation).await,
            Err(e) => {
                // never refuse a liquidation because the loop is down
                warn!("Trading loop for {} unavailable ({}), stopping directly", user, e);
                self.ctx.risk.emergency_stop_all_positions(user, confirmation).await
            }
        }
    }

    pub async fn strategy_config(&self, user: &UserId) -> EngineResult<StrategyConfig> {
        self.ctx.signals.strategy_config(user).await
    }

    pub async fn update_strategy_config(
        &self,
        user: &UserId,
        update: StrategyConfigUpdate,
    ) -> EngineResult<StrategyConfig> {
        self.ctx.signals.update_strategy_config(user, update).await
    }

    /// Newest first; `limit` defaults to 50 and is capped at 500
    pub async fn recent_signals(&self, user: &UserId, limit: Option<usize>) -> EngineResult<Vec<Signal>> {
        let limit = limit.unwrap_or(DEFAULT_SIGNAL_LIMIT).clamp(1, MAX_SIGNAL_LIMIT);
        Ok(self.ctx.store.recent_signals(user, limit).await?)
    }

    pub async fn risk_metrics(&self, user: &UserId) -> EngineResult<RiskMetrics> {
        self.ctx.risk.get_risk_metrics(user).await
    }

    pub async fn calculate_risk_metrics(&self, user: &UserId) -> EngineResult<RiskMetrics> {
        self.ctx.risk.calculate_risk_metrics(user).await
    }

    pub async fn risk_limits(&self, user: &UserId) -> EngineResult<RiskLimits> {
        self.ctx.risk.get_risk_limits(user).await
    }

    pub async fn update_risk_limits(&self, user: &UserId, update: &RiskLimitsUpdate) -> EngineResult<RiskLimits> {
        self.ctx.risk.update_risk_limits(user, update).await
    }

    pub async fn check_breaches(&self, user: &UserId) -> EngineResult<BreachReport> {
        self.ctx.risk.check_risk_limit_breaches(user).await
    }

    pub fn broker_name(&self) -> &str {
        self.ctx.broker.name()
    }

    pub async fn broker_healthy(&self) -> bool {
        self.ctx.broker.is_healthy().await
    }

    pub async fn active_loops(&self) -> usize {
        self.loops.read().await.values().filter(|h| !h.is_closed()).count()
    }
}
