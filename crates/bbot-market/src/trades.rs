//! Rolling trade windows and derived flow metrics.
//!
//! Each subscribed symbol keeps three windows (10 s, 60 s, 300 s) of
//! trades ordered by venue timestamp. Eviction is keyed by the trade
//! timestamps themselves, not wall clock, so replays behave identically.
//! Updates come from a single stream consumer per symbol; readers get a
//! metrics snapshot with a monotonically advancing `last_update`.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use bbot_core::{Symbol, Trade};

/// Derived flow metrics for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub tpm_10s: f64,
    pub tpm_60s: f64,
    pub tps_10s: f64,
    pub buy_sell_ratio_60s: f64,
    pub vol_delta_10s: f64,
    pub vol_delta_60s: f64,
    pub vol_delta_300s: f64,
    /// Timestamp of the latest incorporated trade, in milliseconds.
    pub last_update: i64,
}

/// One rolling window of trades.
#[derive(Debug)]
struct TradeWindow {
    window_secs: i64,
    trades: VecDeque<Trade>,
}

impl TradeWindow {
    fn new(window_secs: i64) -> Self {
        Self {
            window_secs,
            trades: VecDeque::new(),
        }
    }

    fn push(&mut self, trade: Trade) {
        self.trades.push_back(trade);
        self.evict(trade.ts_ms);
    }

    fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_secs * 1000;
        while let Some(front) = self.trades.front() {
            if front.ts_ms < cutoff {
                self.trades.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self) -> usize {
        self.trades.len()
    }

    /// Trades per minute over this window's span.
    fn tpm(&self) -> f64 {
        let minutes = self.window_secs as f64 / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        self.count() as f64 / minutes
    }

    fn tps(&self) -> f64 {
        if self.window_secs <= 0 {
            return 0.0;
        }
        self.count() as f64 / self.window_secs as f64
    }

    /// Buy count over sell count with a floor of one sell.
    fn buy_sell_ratio(&self) -> f64 {
        if self.trades.is_empty() {
            return 0.0;
        }
        let buys = self.trades.iter().filter(|t| t.side.is_buy()).count();
        let sells = self.trades.len() - buys;
        buys as f64 / sells.max(1) as f64
    }

    fn volume_delta(&self) -> f64 {
        self.trades.iter().map(|t| t.signed_amount()).sum()
    }
}

/// Per-symbol state behind the aggregator.
#[derive(Debug)]
struct SymbolWindows {
    w10: TradeWindow,
    w60: TradeWindow,
    w300: TradeWindow,
    metrics: TradeMetrics,
}

impl SymbolWindows {
    fn new() -> Self {
        Self {
            w10: TradeWindow::new(10),
            w60: TradeWindow::new(60),
            w300: TradeWindow::new(300),
            metrics: TradeMetrics::default(),
        }
    }

    fn apply(&mut self, trade: Trade) {
        self.w10.push(trade);
        self.w60.push(trade);
        self.w300.push(trade);

        // Stream order within a symbol is venue order; last_update never
        // moves backwards even if the venue re-sends an older stamp.
        let last_update = self.metrics.last_update.max(trade.ts_ms);
        self.metrics = TradeMetrics {
            tpm_10s: self.w10.tpm(),
            tpm_60s: self.w60.tpm(),
            tps_10s: self.w10.tps(),
            buy_sell_ratio_60s: self.w60.buy_sell_ratio(),
            vol_delta_10s: self.w10.volume_delta(),
            vol_delta_60s: self.w60.volume_delta(),
            vol_delta_300s: self.w300.volume_delta(),
            last_update,
        };
    }
}

/// Aggregates the public trade stream into per-symbol metrics.
pub struct TradesAggregator {
    symbols: DashMap<Symbol, SymbolWindows>,
}

impl TradesAggregator {
    pub fn new() -> Self {
        Self {
            symbols: DashMap::new(),
        }
    }

    /// Start tracking a symbol. Idempotent.
    pub fn track(&self, symbol: Symbol) {
        self.symbols.entry(symbol).or_insert_with(SymbolWindows::new);
    }

    pub fn untrack(&self, symbol: &Symbol) {
        self.symbols.remove(symbol);
    }

    /// Incorporate one trade. Untracked symbols are ignored.
    pub fn on_trade(&self, symbol: &Symbol, trade: Trade) {
        if let Some(mut entry) = self.symbols.get_mut(symbol) {
            entry.apply(trade);
            trace!(%symbol, ts = trade.ts_ms, "Trade applied");
        }
    }

    /// Latest metrics snapshot for a symbol.
    pub fn metrics(&self, symbol: &Symbol) -> Option<TradeMetrics> {
        self.symbols.get(symbol).map(|e| e.metrics)
    }

    pub fn tracked_count(&self) -> usize {
        self.symbols.len()
    }

    /// Drop windows for symbols outside the given universe. Used by the
    /// optimisation pass under memory pressure.
    pub fn retain_universe(&self, keep: &[Symbol]) {
        self.symbols.retain(|symbol, _| keep.contains(symbol));
    }
}

impl Default for TradesAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::TradeSide;

    fn trade(ts_ms: i64, amount: f64, side: TradeSide) -> Trade {
        Trade::new(ts_ms, 100.0, amount, side)
    }

    #[test]
    fn test_windows_evict_by_trade_time() {
        let agg = TradesAggregator::new();
        let sym = Symbol::new("BTCUSDT");
        agg.track(sym.clone());

        agg.on_trade(&sym, trade(1_000, 1.0, TradeSide::Buy));
        agg.on_trade(&sym, trade(5_000, 1.0, TradeSide::Buy));
        // 12 s later: the first two leave the 10 s window but stay in 60 s.
        agg.on_trade(&sym, trade(13_000, 1.0, TradeSide::Sell));

        let m = agg.metrics(&sym).unwrap();
        assert!((m.tps_10s - 2.0 / 10.0).abs() < 1e-9);
        assert!((m.tpm_60s - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_buy_sell_ratio_guards_zero_sells() {
        let agg = TradesAggregator::new();
        let sym = Symbol::new("ETHUSDT");
        agg.track(sym.clone());

        agg.on_trade(&sym, trade(1_000, 1.0, TradeSide::Buy));
        agg.on_trade(&sym, trade(1_100, 1.0, TradeSide::Buy));
        let m = agg.metrics(&sym).unwrap();
        // Two buys, zero sells: ratio is buys over max(sells, 1).
        assert!((m.buy_sell_ratio_60s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_delta_signs() {
        let agg = TradesAggregator::new();
        let sym = Symbol::new("SOLUSDT");
        agg.track(sym.clone());

        agg.on_trade(&sym, trade(1_000, 3.0, TradeSide::Buy));
        agg.on_trade(&sym, trade(1_500, 1.0, TradeSide::Sell));
        let m = agg.metrics(&sym).unwrap();
        assert!((m.vol_delta_10s - 2.0).abs() < 1e-9);
        assert!((m.vol_delta_300s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_last_update_is_monotonic() {
        let agg = TradesAggregator::new();
        let sym = Symbol::new("XRPUSDT");
        agg.track(sym.clone());

        agg.on_trade(&sym, trade(5_000, 1.0, TradeSide::Buy));
        agg.on_trade(&sym, trade(4_000, 1.0, TradeSide::Buy));
        let m = agg.metrics(&sym).unwrap();
        assert_eq!(m.last_update, 5_000);
    }

    #[test]
    fn test_untracked_symbol_is_ignored() {
        let agg = TradesAggregator::new();
        let sym = Symbol::new("DOGEUSDT");
        agg.on_trade(&sym, trade(1_000, 1.0, TradeSide::Buy));
        assert!(agg.metrics(&sym).is_none());
    }
}
