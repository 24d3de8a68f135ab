//! Per-symbol market fact table and scan results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::book::L2Depth;
use crate::candle::Candle;
use crate::level::TradingLevel;
use crate::symbol::Symbol;

/// Composite per-symbol snapshot handed to the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: Symbol,
    pub price: f64,
    pub volume_24h_usd: f64,
    /// Open interest in USD. Some venues omit it.
    pub oi_usd: Option<f64>,
    /// 24h open-interest change as a fraction.
    pub oi_change_24h: Option<f64>,
    pub trades_per_minute: f64,
    pub atr_5m: f64,
    pub atr_15m: f64,
    pub bb_width_pct: f64,
    /// Pearson correlation against BTC returns, in [-1, 1].
    pub btc_correlation: f64,
    pub l2_depth: Option<L2Depth>,
    /// 5-minute candles, oldest first. 60+ bars preferred.
    pub candles_5m: Vec<Candle>,
    pub ts_ms: i64,
}

impl MarketData {
    /// ATR(15m) as a fraction of price. Zero when price is unusable.
    pub fn atr_ratio(&self) -> f64 {
        if self.price <= 0.0 {
            return 0.0;
        }
        self.atr_15m / self.price
    }
}

/// Outcome of a single scanner filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub passed: bool,
    /// Observed value. None when the input was unavailable and the
    /// filter was skipped as passing.
    pub value: Option<f64>,
    pub threshold: f64,
    pub reason: String,
}

impl FilterOutcome {
    pub fn pass(value: f64, threshold: f64, reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            value: Some(value),
            threshold,
            reason: reason.into(),
        }
    }

    pub fn fail(value: f64, threshold: f64, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            value: Some(value),
            threshold,
            reason: reason.into(),
        }
    }

    /// Filter skipped because its input is missing. Counts as passed.
    pub fn skipped(threshold: f64, reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            value: None,
            threshold,
            reason: reason.into(),
        }
    }
}

/// Ranked output row of a market scan.
///
/// `passed_all_filters` is always the conjunction of `filter_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub symbol: Symbol,
    pub score: f64,
    /// 1-based rank after truncation. 0 until ranking is assigned.
    pub rank: u32,
    pub market_data: MarketData,
    pub filter_results: BTreeMap<String, bool>,
    pub filter_details: BTreeMap<String, FilterOutcome>,
    pub score_components: BTreeMap<String, f64>,
    pub levels: Vec<TradingLevel>,
    pub ts_ms: i64,
    pub passed_all_filters: bool,
}

impl ScanResult {
    /// Rebuild the pass flag from the recorded filter map.
    pub fn recompute_passed(&mut self) {
        self.passed_all_filters = self.filter_results.values().all(|v| *v);
    }

    pub fn failed_filters(&self) -> Vec<&str> {
        self.filter_results
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
