use crate::domain::entities::user::UserId;
use crate::domain::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Bars needed before SMA50 is meaningful
pub const MIN_HISTORY_BARS: usize = 50;

const MAX_UNIVERSE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketCapPreference {
    #[default]
    Any,
    Large,
    Mid,
    Small,
}

/// Per-user strategy settings. Exactly one per user, created with defaults on
/// first read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub user_id: UserId,
    pub universe: BTreeSet<String>,
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub atr_period: usize,
    pub atr_stop_multiplier: f64,
    pub atr_take_profit_multiplier: f64,
    pub risk_per_trade_percent: f64,
    pub max_position_size_percent: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub min_average_volume: f64,
    pub max_open_positions: usize,
    pub preferred_sectors: Vec<String>,
    pub market_cap_preference: MarketCapPreference,
    pub updated_at: DateTime<Utc>,
}

impl StrategyConfig {
    pub fn default_for(user_id: UserId, now: DateTime<Utc>) -> Self {
        let universe = ["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "JPM", "V"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        StrategyConfig {
            user_id,
            universe,
            ema_fast_period: 12,
            ema_slow_period: 26,
            atr_period: 14,
            atr_stop_multiplier: 2.0,
            atr_take_profit_multiplier: 3.0,
            risk_per_trade_percent: 1.0,
            max_position_size_percent: 10.0,
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            min_price: 5.0,
            max_price: 1000.0,
            min_average_volume: 500_000.0,
            max_open_positions: 10,
            preferred_sectors: Vec::new(),
            market_cap_preference: MarketCapPreference::Any,
            updated_at: now,
        }
    }

    /// Bars required before a symbol can be evaluated
    pub fn required_bars(&self) -> usize {
        MIN_HISTORY_BARS
            .max(self.ema_slow_period)
            .max(self.atr_period + 1)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.universe.is_empty() || self.universe.len() > MAX_UNIVERSE_SIZE {
            return Err(ValidationError::InvalidField {
                field: "universe",
                reason: format!(
                    "must contain between 1 and {} symbols, got {}",
                    MAX_UNIVERSE_SIZE,
                    self.universe.len()
                ),
            });
        }
        for symbol in &self.universe {
            validate_symbol(symbol)?;
        }

        check_range("emaFastPeriod", self.ema_fast_period as f64, 2.0, 50.0)?;
        check_range("emaSlowPeriod", self.ema_slow_period as f64, 5.0, 200.0)?;
        if self.ema_fast_period >= self.ema_slow_period {
            return Err(ValidationError::InvalidField {
                field: "emaFastPeriod",
                reason: format!(
                    "must be below emaSlowPeriod ({} >= {})",
                    self.ema_fast_period, self.ema_slow_period
                ),
            });
        }
        check_range("atrPeriod", self.atr_period as f64, 5.0, 50.0)?;
        check_range("atrStopMultiplier", self.atr_stop_multiplier, 0.5, 5.0)?;
        check_range(
            "atrTakeProfitMultiplier",
            self.atr_take_profit_multiplier,
            1.0,
            10.0,
        )?;
        check_range("riskPerTradePercent", self.risk_per_trade_percent, 0.1, 5.0)?;
        check_range(
            "maxPositionSizePercent",
            self.max_position_size_percent,
            5.0,
            25.0,
        )?;
        check_range("stopLossPercent", self.stop_loss_percent, 1.0, 10.0)?;
        check_range("takeProfitPercent", self.take_profit_percent, 2.0, 50.0)?;
        check_range("minPrice", self.min_price, 0.0, 100_000.0)?;
        check_range("maxPrice", self.max_price, 0.0, 100_000.0)?;
        if self.min_price >= self.max_price {
            return Err(ValidationError::InvalidField {
                field: "minPrice",
                reason: format!(
                    "must be below maxPrice ({} >= {})",
                    self.min_price, self.max_price
                ),
            });
        }
        check_range("minAverageVolume", self.min_average_volume, 0.0, 1e9)?;
        check_range("maxOpenPositions", self.max_open_positions as f64, 1.0, 50.0)?;

        Ok(())
    }

    /// Merge a partial update into a copy of this config. The merged config
    /// is validated as a whole; out-of-bounds values are rejected.
    pub fn apply(
        &self,
        update: StrategyConfigUpdate,
        now: DateTime<Utc>,
    ) -> Result<StrategyConfig, ValidationError> {
        if update.is_empty() {
            return Err(ValidationError::NoRecognizedFields(
                StrategyConfigUpdate::RECOGNIZED.join(", "),
            ));
        }

        let mut next = self.clone();
        if let Some(universe) = update.universe {
            next.universe = universe
                .into_iter()
                .map(|s| s.trim().to_uppercase())
                .collect();
        }
        if let Some(v) = update.ema_fast_period {
            next.ema_fast_period = v;
        }
        if let Some(v) = update.ema_slow_period {
            next.ema_slow_period = v;
        }
        if let Some(v) = update.atr_period {
            next.atr_period = v;
        }
        if let Some(v) = update.atr_stop_multiplier {
            next.atr_stop_multiplier = v;
        }
        if let Some(v) = update.atr_take_profit_multiplier {
            next.atr_take_profit_multiplier = v;
        }
        if let Some(v) = update.risk_per_trade_percent {
            next.risk_per_trade_percent = v;
        }
        if let Some(v) = update.max_position_size_percent {
            next.max_position_size_percent = v;
        }
        if let Some(v) = update.stop_loss_percent {
            next.stop_loss_percent = v;
        }
        if let Some(v) = update.take_profit_percent {
            next.take_profit_percent = v;
        }
        if let Some(v) = update.min_price {
            next.min_price = v;
        }
        if let Some(v) = update.max_price {
            next.max_price = v;
        }
        if let Some(v) = update.min_average_volume {
            next.min_average_volume = v;
        }
        if let Some(v) = update.max_open_positions {
            next.max_open_positions = v;
        }
        if let Some(v) = update.preferred_sectors {
            next.preferred_sectors = v;
        }
        if let Some(v) = update.market_cap_preference {
            next.market_cap_preference = v;
        }

        next.validate()?;
        next.updated_at = now;
        Ok(next)
    }
}

/// Partial update of a [`StrategyConfig`]; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfigUpdate {
    pub universe: Option<Vec<String>>,
    pub ema_fast_period: Option<usize>,
    pub ema_slow_period: Option<usize>,
    pub atr_period: Option<usize>,
    pub atr_stop_multiplier: Option<f64>,
    pub atr_take_profit_multiplier: Option<f64>,
    pub risk_per_trade_percent: Option<f64>,
    pub max_position_size_percent: Option<f64>,
    pub stop_loss_percent: Option<f64>,
    pub take_profit_percent: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_average_volume: Option<f64>,
    pub max_open_positions: Option<usize>,
    pub preferred_sectors: Option<Vec<String>>,
    pub market_cap_preference: Option<MarketCapPreference>,
}

impl StrategyConfigUpdate {
    const RECOGNIZED: [&'static str; 16] = [
        "universe",
        "emaFastPeriod",
        "emaSlowPeriod",
        "atrPeriod",
        "atrStopMultiplier",
        "atrTakeProfitMultiplier",
        "riskPerTradePercent",
        "maxPositionSizePercent",
        "stopLossPercent",
        "takeProfitPercent",
        "minPrice",
        "maxPrice",
        "minAverageVolume",
        "maxOpenPositions",
        "preferredSectors",
        "marketCapPreference",
    ];

    pub fn is_empty(&self) -> bool {
        self.universe.is_none()
            && self.ema_fast_period.is_none()
            && self.ema_slow_period.is_none()
            && self.atr_period.is_none()
            && self.atr_stop_multiplier.is_none()
            && self.atr_take_profit_multiplier.is_none()
            && self.risk_per_trade_percent.is_none()
            && self.max_position_size_percent.is_none()
            && self.stop_loss_percent.is_none()
            && self.take_profit_percent.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
            && self.min_average_volume.is_none()
            && self.max_open_positions.is_none()
            && self.preferred_sectors.is_none()
            && self.market_cap_preference.is_none()
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn validate_symbol(symbol: &str) -> Result<(), ValidationError> {
    let valid = !symbol.is_empty()
        && symbol.len() <= 10
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidSymbol(symbol.to_string()))
    }
}
