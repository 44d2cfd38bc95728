//! ATR position sizing
//!
//! The share count for a new long entry is the smallest of:
//! - risk budget / stop distance, where the stop sits `atr * stop_multiplier`
//!   below the entry price
//! - the max position size share of equity, converted to shares
//! - what the current buying power can pay for
//!
//! Everything is floored to whole shares. A result of 0 means no entry.

use crate::domain::errors::ValidationError;
use crate::domain::value_objects::position_sizing::{
    PositionSizingRequest, PositionSizingResult, SizingLimit,
};

/// PositionSizer service for calculating position sizes
#[derive(Debug, Clone, Default)]
pub struct PositionSizer;

impl PositionSizer {
    pub fn new() -> Self {
        Self
    }

    /// Size a position based on request parameters
    pub fn size_position(
        &self,
        req: &PositionSizingRequest,
    ) -> Result<PositionSizingResult, ValidationError> {
        req.validate()?;

        let stop_loss = req.price - req.atr * req.atr_stop_multiplier;
        let take_profit = req.price + req.atr * req.atr_take_profit_multiplier;
        let risk_amount = req.equity * req.risk_per_trade_percent / 100.0;
        let stop_distance = req.price - stop_loss;

        if stop_distance <= 0.0 || stop_loss <= 0.0 {
            return Ok(PositionSizingResult {
                shares: 0,
                stop_loss,
                take_profit,
                risk_amount,
                limited_by: SizingLimit::NoStopDistance,
            });
        }

        let by_risk = whole_shares(risk_amount / stop_distance);
        let by_max_position =
            whole_shares(req.equity * req.max_position_size_percent / 100.0 / req.price);
        let by_buying_power = whole_shares(req.buying_power / req.price);

        let (shares, limited_by) = [
            (by_risk, SizingLimit::Risk),
            (by_max_position, SizingLimit::MaxPositionSize),
            (by_buying_power, SizingLimit::BuyingPower),
        ]
        .into_iter()
        .min_by_key(|(shares, _)| *shares)
        .unwrap_or((0, SizingLimit::Risk));

        Ok(PositionSizingResult {
            shares,
            stop_loss,
            take_profit,
            risk_amount,
            limited_by,
        })
    }
}

fn whole_shares(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u64
    } else {
        0
    }
}
