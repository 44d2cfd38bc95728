use crate::domain::entities::user::UserId;
use crate::domain::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingStatus {
    Active,
    Paused,
    Stopped,
}

impl TradingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingStatus::Active => "active",
            TradingStatus::Paused => "paused",
            TradingStatus::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(TradingStatus::Active),
            "paused" => Some(TradingStatus::Paused),
            "stopped" => Some(TradingStatus::Stopped),
            _ => None,
        }
    }
}

/// The switch the trading loop reads every cycle.
///
/// Transitions:
/// - stopped -> active (enable)
/// - paused -> active (resume)
/// - active -> paused (pause)
/// - active | paused -> stopped (disable, emergency stop)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingPreferences {
    pub user_id: UserId,
    pub auto_trading_enabled: bool,
    pub trading_status: TradingStatus,
    pub last_toggle_time: Option<DateTime<Utc>>,
}

impl TradingPreferences {
    pub fn default_for(user_id: UserId) -> Self {
        TradingPreferences {
            user_id,
            auto_trading_enabled: false,
            trading_status: TradingStatus::Stopped,
            last_toggle_time: None,
        }
    }

    /// True when the loop may submit orders this cycle
    pub fn is_trading(&self) -> bool {
        self.auto_trading_enabled && self.trading_status == TradingStatus::Active
    }

    /// Flip the enabled flag. Returns true when the flag actually changed;
    /// `last_toggle_time` is only written on a flip.
    pub fn toggle(&mut self, enabled: bool, now: DateTime<Utc>) -> bool {
        if self.auto_trading_enabled == enabled {
            return false;
        }
        self.auto_trading_enabled = enabled;
        self.trading_status = if enabled {
            TradingStatus::Active
        } else {
            TradingStatus::Stopped
        };
        self.last_toggle_time = Some(now);
        true
    }

    /// Unconditional disable used by the emergency stop
    pub fn force_stop(&mut self, now: DateTime<Utc>) {
        self.auto_trading_enabled = false;
        self.trading_status = TradingStatus::Stopped;
        self.last_toggle_time = Some(now);
    }

    pub fn pause(&mut self) -> Result<(), ValidationError> {
        match self.trading_status {
            TradingStatus::Active => {
                self.trading_status = TradingStatus::Paused;
                Ok(())
            }
            other => Err(invalid_transition(other, TradingStatus::Paused)),
        }
    }

    pub fn resume(&mut self) -> Result<(), ValidationError> {
        match self.trading_status {
            TradingStatus::Paused if self.auto_trading_enabled => {
                self.trading_status = TradingStatus::Active;
                Ok(())
            }
            other => Err(invalid_transition(other, TradingStatus::Active)),
        }
    }
}

fn invalid_transition(from: TradingStatus, to: TradingStatus) -> ValidationError {
    ValidationError::InvalidField {
        field: "tradingStatus",
        reason: format!("cannot move from {} to {}", from.as_str(), to.as_str()),
    }
}
