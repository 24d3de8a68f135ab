//! Signal generator.
//!
//! Tries the preset's preferred strategy first and falls back to the
//! other; when both fire for the same candidate the higher confidence
//! wins. At most one signal per symbol per cycle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use bbot_core::{ScanResult, Signal, Strategy, Symbol};
use bbot_diag::DiagSink;

use crate::config::SignalConfig;
use crate::history::BreakoutHistory;
use crate::strategies::{evaluate_momentum, evaluate_retest, SymbolFeatures};

/// Shared handle to the breakout history, written by the position
/// manager and read here.
pub type SharedHistory = Arc<RwLock<BreakoutHistory>>;

/// Generates entry signals from scan results and live features.
pub struct SignalGenerator {
    config: SignalConfig,
    history: SharedHistory,
    diag: DiagSink,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig, history: SharedHistory, diag: DiagSink) -> Self {
        Self {
            config,
            history,
            diag,
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// One pass over the scan candidates. Only rows that passed all
    /// filters are considered.
    pub fn generate(
        &self,
        scan_results: &[ScanResult],
        features: &HashMap<Symbol, SymbolFeatures>,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        for scan in scan_results {
            if !scan.passed_all_filters {
                continue;
            }
            let symbol_features = features.get(&scan.symbol).copied().unwrap_or_default();
            if let Some(signal) = self.generate_for(scan, symbol_features) {
                info!(
                    symbol = %signal.symbol,
                    strategy = %signal.strategy,
                    side = %signal.side,
                    confidence = signal.confidence,
                    "Signal generated"
                );
                signals.push(signal);
            }
        }
        signals
    }

    /// Evaluate both strategies for one candidate in priority order.
    pub fn generate_for(&self, scan: &ScanResult, features: SymbolFeatures) -> Option<Signal> {
        let history = self.history.read();

        let momentum = || evaluate_momentum(&self.config, scan, features, &self.diag);
        let retest = || evaluate_retest(&self.config, scan, features, &history, &self.diag);

        let (first, second) = match self.config.strategy_priority {
            Strategy::Momentum => (momentum(), retest()),
            Strategy::Retest => (retest(), momentum()),
        };

        match (first, second) {
            (Some(a), Some(b)) => {
                debug!(
                    symbol = %scan.symbol,
                    a = %a.strategy,
                    b = %b.strategy,
                    "Both strategies fired, picking higher confidence"
                );
                Some(if a.confidence >= b.confidence { a } else { b })
            }
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::BreakoutRecord;
    use bbot_core::{Candle, LevelKind, MarketData, Side, Symbol, TradingLevel};
    use std::collections::BTreeMap;

    fn resistance(price: f64, strength: f64) -> TradingLevel {
        TradingLevel {
            price,
            kind: LevelKind::Resistance,
            touch_count: 3,
            strength,
            first_touch_ts: 0,
            last_touch_ts: 0,
            is_round_number: true,
            round_bonus: 0.1,
            in_cascade: false,
            cascade_size: 0,
        }
    }

    /// Flat consolidation between 99.95 and 100.05, breakout on the
    /// last bar closing 100.20 on five times the prior volume.
    fn breakout_scan() -> ScanResult {
        let mut candles: Vec<Candle> = (0..39)
            .map(|i| Candle::new(i as i64 * 300_000, 99.95, 100.05, 99.95, 100.0, 1_000.0))
            .collect();
        candles.push(Candle::new(
            39 * 300_000,
            100.00,
            100.22,
            100.02,
            100.20,
            5_000.0,
        ));

        let market_data = MarketData {
            symbol: Symbol::new("TESTUSDT"),
            price: 100.20,
            volume_24h_usd: 50_000_000.0,
            oi_usd: None,
            oi_change_24h: None,
            trades_per_minute: 30.0,
            atr_5m: 0.1,
            atr_15m: 0.3,
            bb_width_pct: 2.0,
            btc_correlation: 0.2,
            l2_depth: None,
            candles_5m: candles,
            ts_ms: 0,
        };

        ScanResult {
            symbol: market_data.symbol.clone(),
            score: 1.5,
            rank: 1,
            market_data,
            filter_results: BTreeMap::new(),
            filter_details: BTreeMap::new(),
            score_components: BTreeMap::new(),
            levels: vec![resistance(100.0, 0.9)],
            ts_ms: 0,
            passed_all_filters: true,
        }
    }

    fn generator(history: BreakoutHistory) -> SignalGenerator {
        SignalGenerator::new(
            SignalConfig::default(),
            Arc::new(RwLock::new(history)),
            DiagSink::disabled(),
        )
    }

    #[test]
    fn test_momentum_breakout_fires_long() {
        let gen = generator(BreakoutHistory::new());
        let scan = breakout_scan();
        let features = SymbolFeatures {
            l2_imbalance: 0.6,
            activity_index: 1.0,
        };

        let signal = gen.generate_for(&scan, features).expect("signal");
        assert_eq!(signal.side, Side::Long);
        assert_eq!(signal.strategy, Strategy::Momentum);
        // Entry sits just above the broken level.
        assert!((signal.entry - 100.10).abs() < 0.01);
        assert!(signal.sl < 100.0);
        assert!(signal.confidence >= 0.7);
        assert!(signal.is_consistent());
    }

    #[test]
    fn test_momentum_requires_imbalance_on_breakout_side() {
        let gen = generator(BreakoutHistory::new());
        let scan = breakout_scan();
        // Ask-heavy book against a long breakout.
        let features = SymbolFeatures {
            l2_imbalance: -0.6,
            activity_index: 1.0,
        };
        assert!(gen.generate_for(&scan, features).is_none());
    }

    #[test]
    fn test_retest_fires_after_prior_breakout() {
        // Price consolidating right at the previously broken 50.5 level.
        let mut candles: Vec<Candle> = (0..30)
            .map(|i| {
                Candle::new(
                    chrono::Utc::now().timestamp_millis() - (30 - i) * 300_000,
                    50.55,
                    50.65,
                    50.48,
                    50.55,
                    800.0,
                )
            })
            .collect();
        let last_ts = chrono::Utc::now().timestamp_millis();
        candles.push(Candle::new(last_ts, 50.54, 50.58, 50.50, 50.52, 900.0));

        let market_data = MarketData {
            symbol: Symbol::new("RETESTUSDT"),
            price: 50.52,
            volume_24h_usd: 30_000_000.0,
            oi_usd: None,
            oi_change_24h: None,
            trades_per_minute: 12.0,
            atr_5m: 0.05,
            atr_15m: 0.1,
            bb_width_pct: 2.0,
            btc_correlation: 0.1,
            l2_depth: None,
            candles_5m: candles,
            ts_ms: last_ts,
        };
        let scan = ScanResult {
            symbol: market_data.symbol.clone(),
            score: 1.0,
            rank: 1,
            market_data,
            filter_results: BTreeMap::new(),
            filter_details: BTreeMap::new(),
            score_components: BTreeMap::new(),
            levels: vec![],
            ts_ms: last_ts,
            passed_all_filters: true,
        };

        let mut history = BreakoutHistory::new();
        history.record(
            scan.symbol.clone(),
            BreakoutRecord {
                ts_ms: last_ts - 8 * 300_000,
                level_price: 50.5,
                side: Side::Long,
            },
        );

        let gen = generator(history);
        let features = SymbolFeatures {
            l2_imbalance: 0.55,
            activity_index: 0.8,
        };
        let signal = gen.generate_for(&scan, features).expect("retest signal");
        assert_eq!(signal.strategy, Strategy::Retest);
        assert_eq!(signal.side, Side::Long);
        assert!((signal.entry - 50.52).abs() < 1e-9);
        assert!(signal.sl < 50.5);
    }

    #[test]
    fn test_failed_candidates_produce_nothing() {
        let gen = generator(BreakoutHistory::new());
        let mut scan = breakout_scan();
        scan.passed_all_filters = false;
        let signals = gen.generate(&[scan], &HashMap::new());
        assert!(signals.is_empty());
    }
}
