//! OHLCV candle type.

use serde::{Deserialize, Serialize};

/// A single OHLCV bar. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in milliseconds since epoch.
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(ts_ms: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            ts_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Full bar range, high to low.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Body as a fraction of range. Zero-range bars yield 0.
    pub fn body_ratio(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            return 0.0;
        }
        self.body() / range
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Typical price used by VWAP-style aggregates.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_ratio() {
        let c = Candle::new(0, 100.0, 100.20, 100.0, 100.18, 5000.0);
        assert!((c.body_ratio() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_body_ratio_zero_range() {
        let c = Candle::new(0, 100.0, 100.0, 100.0, 100.0, 0.0);
        assert_eq!(c.body_ratio(), 0.0);
    }

    #[test]
    fn test_serde_round_trip_is_identity() {
        let c = Candle::new(1_700_000_000_000, 1.5, 2.5, 1.0, 2.0, 1234.5);
        let json = serde_json::to_string(&c).unwrap();
        let back: Candle = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
