//! Position sizing request and result value objects

use crate::domain::errors::ValidationError;
use serde::{Deserialize, Serialize};

/// Inputs for ATR-based sizing of one long entry
#[derive(Debug, Clone)]
pub struct PositionSizingRequest {
    /// Trading symbol (e.g., "AAPL")
    pub symbol: String,
    /// Account equity
    pub equity: f64,
    /// Cash the brokerage lets us spend right now
    pub buying_power: f64,
    /// Entry reference price (last close)
    pub price: f64,
    /// Average True Range over the configured period
    pub atr: f64,
    pub atr_stop_multiplier: f64,
    pub atr_take_profit_multiplier: f64,
    /// Share of equity put at risk, in percent (1.0 = 1%)
    pub risk_per_trade_percent: f64,
    /// Largest position as a share of equity, in percent
    pub max_position_size_percent: f64,
}

impl PositionSizingRequest {
    /// Validate this request
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.is_empty() {
            return Err(ValidationError::InvalidSymbol(self.symbol.clone()));
        }
        for (field, value) in [
            ("equity", self.equity),
            ("buyingPower", self.buying_power),
            ("atr", self.atr),
            ("atrStopMultiplier", self.atr_stop_multiplier),
            ("atrTakeProfitMultiplier", self.atr_take_profit_multiplier),
            ("riskPerTradePercent", self.risk_per_trade_percent),
            ("maxPositionSizePercent", self.max_position_size_percent),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::NotFiniteNonNegative { field, value });
            }
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError::InvalidField {
                field: "price",
                reason: format!("must be positive, got {}", self.price),
            });
        }
        Ok(())
    }
}

/// Which bound decided the final share count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingLimit {
    /// Risk budget divided by stop distance
    Risk,
    MaxPositionSize,
    BuyingPower,
    /// Stop distance is zero or the stop would sit at or below zero
    NoStopDistance,
}

/// Result of position sizing calculation
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSizingResult {
    /// Whole shares to buy, 0 means do not enter
    pub shares: u64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Dollar amount the risk budget allows to lose
    pub risk_amount: f64,
    pub limited_by: SizingLimit,
}

impl PositionSizingResult {
    pub fn notional_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    /// Dollars lost if the stop fills exactly
    pub fn risk_at_stop(&self, price: f64) -> f64 {
        self.shares as f64 * (price - self.stop_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PositionSizingRequest {
        PositionSizingRequest {
            symbol: "AAPL".to_string(),
            equity: 100_000.0,
            buying_power: 100_000.0,
            price: 100.0,
            atr: 2.5,
            atr_stop_multiplier: 2.0,
            atr_take_profit_multiplier: 3.0,
            risk_per_trade_percent: 1.0,
            max_position_size_percent: 10.0,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_empty_symbol() {
        let mut req = request();
        req.symbol = String::new();
        assert!(matches!(req.validate(), Err(ValidationError::InvalidSymbol(_))));
    }

    #[test]
    fn test_negative_equity() {
        let mut req = request();
        req.equity = -1.0;
        assert_eq!(
            req.validate(),
            Err(ValidationError::NotFiniteNonNegative {
                field: "equity",
                value: -1.0
            })
        );
    }

    #[test]
    fn test_zero_price() {
        let mut req = request();
        req.price = 0.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_risk_at_stop() {
        let result = PositionSizingResult {
            shares: 200,
            stop_loss: 95.0,
            take_profit: 107.5,
            risk_amount: 1000.0,
            limited_by: SizingLimit::Risk,
        };
        assert_eq!(result.risk_at_stop(100.0), 1000.0);
        assert_eq!(result.notional_value(100.0), 20_000.0);
    }
}
