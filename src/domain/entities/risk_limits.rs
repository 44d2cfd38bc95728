use crate::domain::entities::user::UserId;
use crate::domain::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimitUnit {
    #[default]
    Percentage,
    Dollar,
}

/// One configurable threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitSetting {
    pub value: f64,
    pub enabled: bool,
    #[serde(default)]
    pub unit: LimitUnit,
}

impl LimitSetting {
    pub fn percent(value: f64, enabled: bool) -> Self {
        LimitSetting {
            value,
            enabled,
            unit: LimitUnit::Percentage,
        }
    }
}

/// Which halt flag, if any, governs a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltGroup {
    DailyLoss,
    Drawdown,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitKind {
    DailyLossLimit,
    PortfolioDrawdownLimit,
    PositionLossThreshold,
    DailyLossThreshold,
    DrawdownThreshold,
    VolatilityThreshold,
}

impl LimitKind {
    pub const ALL: [LimitKind; 6] = [
        LimitKind::DailyLossLimit,
        LimitKind::PortfolioDrawdownLimit,
        LimitKind::PositionLossThreshold,
        LimitKind::DailyLossThreshold,
        LimitKind::DrawdownThreshold,
        LimitKind::VolatilityThreshold,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LimitKind::DailyLossLimit => "dailyLossLimit",
            LimitKind::PortfolioDrawdownLimit => "portfolioDrawdownLimit",
            LimitKind::PositionLossThreshold => "positionLossThreshold",
            LimitKind::DailyLossThreshold => "dailyLossThreshold",
            LimitKind::DrawdownThreshold => "drawdownThreshold",
            LimitKind::VolatilityThreshold => "volatilityThreshold",
        }
    }

    pub fn halt_group(&self) -> HaltGroup {
        match self {
            LimitKind::DailyLossLimit | LimitKind::DailyLossThreshold => HaltGroup::DailyLoss,
            LimitKind::PortfolioDrawdownLimit | LimitKind::DrawdownThreshold => {
                HaltGroup::Drawdown
            }
            LimitKind::PositionLossThreshold | LimitKind::VolatilityThreshold => HaltGroup::None,
        }
    }
}

/// Per-user risk thresholds, created with defaults on first access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskLimits {
    pub user_id: UserId,
    pub daily_loss_limit: LimitSetting,
    pub portfolio_drawdown_limit: LimitSetting,
    pub position_loss_threshold: LimitSetting,
    pub daily_loss_threshold: LimitSetting,
    pub drawdown_threshold: LimitSetting,
    pub volatility_threshold: LimitSetting,
    pub halt_trading_on_daily_limit: bool,
    pub halt_trading_on_drawdown: bool,
    pub updated_at: DateTime<Utc>,
}

impl RiskLimits {
    pub fn default_for(user_id: UserId, now: DateTime<Utc>) -> Self {
        RiskLimits {
            user_id,
            daily_loss_limit: LimitSetting::percent(5.0, true),
            portfolio_drawdown_limit: LimitSetting::percent(15.0, true),
            position_loss_threshold: LimitSetting::percent(10.0, true),
            daily_loss_threshold: LimitSetting::percent(3.0, false),
            drawdown_threshold: LimitSetting::percent(10.0, false),
            volatility_threshold: LimitSetting::percent(40.0, false),
            halt_trading_on_daily_limit: true,
            halt_trading_on_drawdown: true,
            updated_at: now,
        }
    }

    pub fn setting(&self, kind: LimitKind) -> &LimitSetting {
        match kind {
            LimitKind::DailyLossLimit => &self.daily_loss_limit,
            LimitKind::PortfolioDrawdownLimit => &self.portfolio_drawdown_limit,
            LimitKind::PositionLossThreshold => &self.position_loss_threshold,
            LimitKind::DailyLossThreshold => &self.daily_loss_threshold,
            LimitKind::DrawdownThreshold => &self.drawdown_threshold,
            LimitKind::VolatilityThreshold => &self.volatility_threshold,
        }
    }

    fn setting_mut(&mut self, kind: LimitKind) -> &mut LimitSetting {
        match kind {
            LimitKind::DailyLossLimit => &mut self.daily_loss_limit,
            LimitKind::PortfolioDrawdownLimit => &mut self.portfolio_drawdown_limit,
            LimitKind::PositionLossThreshold => &mut self.position_loss_threshold,
            LimitKind::DailyLossThreshold => &mut self.daily_loss_threshold,
            LimitKind::DrawdownThreshold => &mut self.drawdown_threshold,
            LimitKind::VolatilityThreshold => &mut self.volatility_threshold,
        }
    }

    /// Whether a breach of `kind` should halt order submission
    pub fn halts_on(&self, kind: LimitKind) -> bool {
        match kind.halt_group() {
            HaltGroup::DailyLoss => self.halt_trading_on_daily_limit,
            HaltGroup::Drawdown => self.halt_trading_on_drawdown,
            HaltGroup::None => false,
        }
    }

    /// Merge a partial update. Every supplied value must be a finite
    /// non-negative number; nothing is written when any field is invalid.
    pub fn apply(
        &self,
        update: &RiskLimitsUpdate,
        now: DateTime<Utc>,
    ) -> Result<RiskLimits, ValidationError> {
        if update.is_empty() {
            return Err(ValidationError::NoRecognizedFields(
                RiskLimitsUpdate::RECOGNIZED.join(", "),
            ));
        }

        let mut next = self.clone();
        for kind in LimitKind::ALL {
            let Some(patch) = update.for_kind(kind) else {
                continue;
            };
            let setting = next.setting_mut(kind);
            if let Some(value) = patch.value {
                if !value.is_finite() || value < 0.0 {
                    return Err(ValidationError::NotFiniteNonNegative {
                        field: kind.name(),
                        value,
                    });
                }
                setting.value = value;
            }
            if let Some(enabled) = patch.enabled {
                setting.enabled = enabled;
            }
            if let Some(unit) = patch.unit {
                if unit == LimitUnit::Dollar && kind != LimitKind::DailyLossLimit {
                    return Err(ValidationError::InvalidField {
                        field: kind.name(),
                        reason: "only dailyLossLimit accepts a dollar unit".to_string(),
                    });
                }
                setting.unit = unit;
            }
        }
        if let Some(flag) = update.halt_trading_on_daily_limit {
            next.halt_trading_on_daily_limit = flag;
        }
        if let Some(flag) = update.halt_trading_on_drawdown {
            next.halt_trading_on_drawdown = flag;
        }

        next.updated_at = now;
        Ok(next)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitSettingUpdate {
    pub value: Option<f64>,
    pub enabled: Option<bool>,
    pub unit: Option<LimitUnit>,
}

/// Partial update of [`RiskLimits`]. Unknown keys are ignored during
/// deserialization; a body with no recognized key at all is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskLimitsUpdate {
    pub daily_loss_limit: Option<LimitSettingUpdate>,
    pub portfolio_drawdown_limit: Option<LimitSettingUpdate>,
    pub position_loss_threshold: Option<LimitSettingUpdate>,
    pub daily_loss_threshold: Option<LimitSettingUpdate>,
    pub drawdown_threshold: Option<LimitSettingUpdate>,
    pub volatility_threshold: Option<LimitSettingUpdate>,
    pub halt_trading_on_daily_limit: Option<bool>,
    pub halt_trading_on_drawdown: Option<bool>,
}

impl RiskLimitsUpdate {
    const RECOGNIZED: [&'static str; 8] = [
        "dailyLossLimit",
        "portfolioDrawdownLimit",
        "positionLossThreshold",
        "dailyLossThreshold",
        "drawdownThreshold",
        "volatilityThreshold",
        "haltTradingOnDailyLimit",
        "haltTradingOnDrawdown",
    ];

    pub fn is_empty(&self) -> bool {
        LimitKind::ALL.iter().all(|k| self.for_kind(*k).is_none())
            && self.halt_trading_on_daily_limit.is_none()
            && self.halt_trading_on_drawdown.is_none()
    }

    fn for_kind(&self, kind: LimitKind) -> Option<&LimitSettingUpdate> {
        match kind {
            LimitKind::DailyLossLimit => self.daily_loss_limit.as_ref(),
            LimitKind::PortfolioDrawdownLimit => self.portfolio_drawdown_limit.as_ref(),
            LimitKind::PositionLossThreshold => self.position_loss_threshold.as_ref(),
            LimitKind::DailyLossThreshold => self.daily_loss_threshold.as_ref(),
            LimitKind::DrawdownThreshold => self.drawdown_threshold.as_ref(),
            LimitKind::VolatilityThreshold => self.volatility_threshold.as_ref(),
        }
    }
}
