//! Portfolio risk math. No I/O: the engine gathers account, positions and
//! return histories, this module turns them into a [`RiskMetrics`] snapshot.

use crate::domain::entities::risk_metrics::{
    CorrelationMatrix, PositionConcentration, RiskMetrics, SectorConcentration,
};
use crate::domain::entities::user::UserId;
use crate::domain::repositories::broker_client::{AccountSnapshot, BrokerPosition};
use crate::domain::services::sectors::sector_for;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Everything one snapshot is computed from
pub struct PortfolioInputs<'a> {
    pub account: &'a AccountSnapshot,
    pub positions: &'a [BrokerPosition],
    /// Daily returns per held symbol; symbols without history are absent
    pub returns: &'a BTreeMap<String, Vec<f64>>,
    /// Latest snapshot before this one, carries peak and max drawdown
    pub previous: Option<&'a RiskMetrics>,
}

/// (peak - value) / peak in percent, 0 for a non-positive peak
pub fn drawdown_percent(peak: f64, value: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    ((peak - value) / peak * 100.0).max(0.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, 0 for fewer than two points
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Pearson correlation over the common tail of both series. 0 when fewer
/// than two points overlap or either side has no variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let (ma, mb) = (mean(a), mean(b));

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        var_a += (x - ma).powi(2);
        var_b += (y - mb).powi(2);
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

pub fn correlation_matrix(returns: &BTreeMap<String, Vec<f64>>) -> CorrelationMatrix {
    let mut matrix = CorrelationMatrix::new();
    for (a, ra) in returns {
        let row = matrix.entry(a.clone()).or_default();
        for (b, rb) in returns {
            let value = if a == b { 1.0 } else { pearson(ra, rb) };
            row.insert(b.clone(), value);
        }
    }
    matrix
}

/// Position-value-weighted annualised volatility in percent. Only symbols
/// with a return history carry weight.
pub fn volatility_index(values: &BTreeMap<String, f64>, returns: &BTreeMap<String, Vec<f64>>) -> f64 {
    let weighted: Vec<(f64, f64)> = values
        .iter()
        .filter_map(|(symbol, value)| returns.get(symbol).map(|r| (value.abs(), std_dev(r))))
        .collect();

    let total: f64 = weighted.iter().map(|(v, _)| v).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let daily: f64 = weighted.iter().map(|(v, sd)| v / total * sd).sum();
    daily * TRADING_DAYS_PER_YEAR.sqrt() * 100.0
}

fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// Build a new snapshot. The previous snapshot is only read for the running
/// peak and max drawdown; it is never modified.
pub fn calculate(
    id: String,
    user_id: UserId,
    inputs: &PortfolioInputs<'_>,
    calculated_at: DateTime<Utc>,
) -> RiskMetrics {
    let portfolio_value = inputs.account.equity;

    let mut by_symbol: BTreeMap<String, f64> = BTreeMap::new();
    for position in inputs.positions {
        *by_symbol.entry(position.symbol.clone()).or_default() += position.market_value().abs();
    }
    let total_position_value: f64 = by_symbol.values().sum();

    let mut by_sector: BTreeMap<&'static str, f64> = BTreeMap::new();
    for (symbol, value) in &by_symbol {
        *by_sector.entry(sector_for(symbol)).or_default() += value;
    }

    let mut position_concentration: Vec<PositionConcentration> = by_symbol
        .iter()
        .map(|(symbol, value)| PositionConcentration {
            symbol: symbol.clone(),
            value: *value,
            percentage: share(*value, total_position_value),
        })
        .collect();
    position_concentration.sort_by(|a, b| b.value.total_cmp(&a.value));

    let mut sector_concentration: Vec<SectorConcentration> = by_sector
        .iter()
        .map(|(sector, value)| SectorConcentration {
            sector: sector.to_string(),
            value: *value,
            percentage: share(*value, total_position_value),
        })
        .collect();
    sector_concentration.sort_by(|a, b| b.value.total_cmp(&a.value));

    let daily_pnl = inputs.account.equity - inputs.account.last_equity;
    let daily_pnl_percent = share(daily_pnl, inputs.account.last_equity);

    let previous_peak = inputs.previous.map(|m| m.peak_portfolio_value).unwrap_or(0.0);
    let peak_portfolio_value = previous_peak.max(portfolio_value);
    let current_drawdown = drawdown_percent(peak_portfolio_value, portfolio_value);
    let max_drawdown = inputs
        .previous
        .map(|m| m.max_drawdown)
        .unwrap_or(0.0)
        .max(current_drawdown);

    RiskMetrics {
        id,
        user_id,
        current_risk_exposure: share(total_position_value, portfolio_value),
        portfolio_value,
        cash_available: inputs.account.cash,
        daily_pnl,
        daily_pnl_percent,
        peak_portfolio_value,
        current_drawdown,
        max_drawdown,
        sector_concentration,
        position_concentration,
        correlation_matrix: correlation_matrix(inputs.returns),
        volatility_index: volatility_index(&by_symbol, inputs.returns),
        calculated_at,
    }
}
