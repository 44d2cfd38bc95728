use crate::domain::entities::price_bar::{closes, PriceBar};
use crate::domain::entities::strategy_config::StrategyConfig;
use serde::{Deserialize, Serialize};

pub const RSI_PERIOD: usize = 14;
pub const MACD_SIGNAL_PERIOD: usize = 9;
const VOLUME_WINDOW: usize = 20;

/// Mean of the trailing `period` values. 0 when there are fewer points.
pub fn sma(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period {
        return 0.0;
    }
    prices[prices.len() - period..].iter().sum::<f64>() / period as f64
}

/// Running EMA, seeded with the SMA of the first `period` values. Element `k`
/// is the EMA at input index `period - 1 + k`; empty when there are fewer
/// than `period` values.
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return vec![];
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut values = Vec::with_capacity(prices.len() - period + 1);

    // First EMA is SMA
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    values.push(ema);

    for &price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
        values.push(ema);
    }

    values
}

/// Latest EMA value. 0 when there are fewer than `period` points.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    ema_series(prices, period).last().copied().unwrap_or(0.0)
}

/// Wilder RSI. 50 when there are fewer than `period + 1` points or the series
/// is flat, 100 when there were gains and no losses.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    for &change in &changes[period..] {
        avg_gain = (avg_gain * (period as f64 - 1.0) + change.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + (-change).max(0.0)) / period as f64;
    }

    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacdValues {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD with the classic 12/26/9 periods
pub fn macd(prices: &[f64]) -> MacdValues {
    macd_with(prices, 12, 26, MACD_SIGNAL_PERIOD)
}

/// MACD line = EMA(fast) - EMA(slow); signal = EMA(signal_period) of the
/// MACD line computed at every index where both EMAs exist. All zero when
/// there are fewer than `slow` points.
pub fn macd_with(prices: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdValues {
    if fast == 0 || slow == 0 || prices.len() < slow.max(fast) {
        return MacdValues::default();
    }

    let fast_values = ema_series(prices, fast);
    let slow_values = ema_series(prices, slow);

    // Align both series on input index: fast starts at fast-1, slow at slow-1
    let offset = slow.saturating_sub(fast);
    let line_series: Vec<f64> = slow_values
        .iter()
        .enumerate()
        .filter_map(|(i, s)| fast_values.get(i + offset).map(|f| f - s))
        .collect();

    let line = line_series.last().copied().unwrap_or(0.0);
    let signal = ema(&line_series, signal_period);

    MacdValues {
        line,
        signal,
        histogram: line - signal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Neutral => "neutral",
        }
    }
}

pub fn trend(sma20: f64, sma50: f64, price: f64) -> Trend {
    if price > sma20 && sma20 > sma50 {
        Trend::Bullish
    } else if price < sma20 && sma20 < sma50 {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

/// Composite 0-100 score, 50 is neutral
pub fn strength(rsi: f64, macd_histogram: f64, trend: Trend, price_above_sma20: bool) -> f64 {
    let mut score = 50.0;

    if rsi < 30.0 {
        score += 30.0;
    } else if rsi > 70.0 {
        score -= 30.0;
    } else if (40.0..=60.0).contains(&rsi) {
        score += 10.0;
    }

    if macd_histogram > 0.0 {
        score += 30.0;
    } else if macd_histogram < 0.0 {
        score -= 30.0;
    }

    match trend {
        Trend::Bullish => score += 20.0,
        Trend::Bearish => score -= 20.0,
        Trend::Neutral => {}
    }

    if price_above_sma20 {
        score += 20.0;
    } else {
        score -= 20.0;
    }

    f64::clamp(score, 0.0, 100.0)
}

fn true_range(bar: &PriceBar, previous_close: f64) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - previous_close).abs())
        .max((bar.low - previous_close).abs())
}

/// Average True Range with Wilder smoothing. 0 when there are fewer than
/// `period + 1` bars.
pub fn atr(bars: &[PriceBar], period: usize) -> f64 {
    if period == 0 || bars.len() < period + 1 {
        return 0.0;
    }

    let ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let mut value = ranges[..period].iter().sum::<f64>() / period as f64;
    for &range in &ranges[period..] {
        value = (value * (period as f64 - 1.0) + range) / period as f64;
    }
    value
}

/// Everything the generator reads for one symbol at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub sma20: f64,
    pub sma50: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub macd: MacdValues,
    pub trend: Trend,
    pub strength: f64,
    pub atr: f64,
    pub average_volume: f64,
}

impl IndicatorSnapshot {
    /// None for an empty series
    pub fn compute(bars: &[PriceBar], config: &StrategyConfig) -> Option<Self> {
        let last = bars.last()?;
        let prices = closes(bars);
        let price = last.close;

        let sma20 = sma(&prices, 20);
        let sma50 = sma(&prices, 50);
        let rsi = rsi(&prices, RSI_PERIOD);
        let macd = macd_with(
            &prices,
            config.ema_fast_period,
            config.ema_slow_period,
            MACD_SIGNAL_PERIOD,
        );
        let trend = trend(sma20, sma50, price);
        let strength = strength(rsi, macd.histogram, trend, price > sma20);

        let window = bars.len().min(VOLUME_WINDOW);
        let average_volume =
            bars[bars.len() - window..].iter().map(|b| b.volume).sum::<f64>() / window as f64;

        Some(IndicatorSnapshot {
            price,
            sma20,
            sma50,
            ema_fast: ema(&prices, config.ema_fast_period),
            ema_slow: ema(&prices, config.ema_slow_period),
            rsi,
            macd,
            trend,
            strength,
            atr: atr(bars, config.atr_period),
            average_volume,
        })
    }

    /// How many of the four entry conditions hold
    pub fn buy_votes(&self) -> usize {
        [
            self.rsi < 40.0,
            self.macd.histogram > 0.0,
            matches!(self.trend, Trend::Bullish | Trend::Neutral),
            self.strength >= 60.0,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }

    /// How many of the four technical exit conditions hold
    pub fn sell_votes(&self) -> usize {
        [
            self.rsi > 70.0,
            self.macd.histogram < 0.0,
            self.trend == Trend::Bearish,
            self.strength < 40.0,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }

    pub fn is_buy(&self) -> bool {
        self.buy_votes() >= 3
    }

    pub fn is_technical_sell(&self) -> bool {
        self.sell_votes() >= 3
    }
}
