use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar as supplied by the brokerage, oldest first in any series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        PriceBar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Closing prices of a bar series
pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Daily close-to-close simple returns
pub fn returns(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .filter(|w| w[0].close > 0.0)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> PriceBar {
        PriceBar::new(Utc::now(), close, close, close, close, 1000.0)
    }

    #[test]
    fn test_closes() {
        let bars = vec![bar(1.0), bar(2.0), bar(3.0)];
        assert_eq!(closes(&bars), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_returns() {
        let bars = vec![bar(100.0), bar(110.0), bar(99.0)];
        let r = returns(&bars);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.10).abs() < 1e-12);
        assert!((r[1] + 0.10).abs() < 1e-12);
    }
}
