//! Order book density detection.
//!
//! Aggregates book levels into price buckets and flags buckets whose
//! size reaches `k_density` times the rolling median as liquidity walls.
//! Tracked walls keep their first observed size so consumption shows up
//! as an eat ratio; crossing the configured ratio emits an `Eaten` event.
//! Events go into a bounded sink and never block the stream callback.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use bbot_core::{indicators, OrderBookSnapshot, Symbol};

/// Which side of the book a density sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// Density detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Threshold multiplier over the rolling median bucket size.
    pub k_density: f64,
    /// Ticks aggregated into one bucket; one tick is 0.01% of mid.
    pub bucket_ticks: u32,
    /// Rolling window for the median, in seconds.
    pub lookback_window_s: i64,
    /// Eat ratio at which an `Eaten` event fires.
    pub enter_on_density_eat_ratio: f64,
    /// Scan range around mid, in basis points.
    pub range_bps: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            k_density: 7.0,
            bucket_ticks: 3,
            lookback_window_s: 300,
            enter_on_density_eat_ratio: 0.75,
            range_bps: 50.0,
        }
    }
}

/// A detected liquidity wall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityLevel {
    pub price: f64,
    pub side: BookSide,
    pub size: f64,
    /// Size over threshold at detection time.
    pub strength: f64,
    pub ts_ms: i64,
    /// Size when first detected; basis of the eat ratio.
    pub initial_size: f64,
}

impl DensityLevel {
    /// Consumed fraction of the initially observed size, in [0, 1].
    pub fn eaten_ratio(&self) -> f64 {
        if self.initial_size <= 0.0 {
            return 0.0;
        }
        (1.0 - self.size / self.initial_size).clamp(0.0, 1.0)
    }
}

/// Density lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityEventKind {
    Detected,
    Eaten,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityEvent {
    pub kind: DensityEventKind,
    pub symbol: Symbol,
    pub density: DensityLevel,
    pub ts_ms: i64,
}

struct SymbolState {
    densities: Vec<DensityLevel>,
    /// (timestamp, bucket sizes) samples for the median window.
    bucket_history: VecDeque<(i64, Vec<f64>)>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            densities: Vec::new(),
            bucket_history: VecDeque::new(),
        }
    }
}

/// Detects and tracks order book densities per symbol.
pub struct DensityDetector {
    config: DensityConfig,
    symbols: HashMap<Symbol, SymbolState>,
    /// Bounded event sink. Full sink drops events rather than blocking.
    event_tx: Option<mpsc::Sender<DensityEvent>>,
}

impl DensityDetector {
    pub fn new(config: DensityConfig) -> Self {
        info!(
            k = config.k_density,
            bucket_ticks = config.bucket_ticks,
            eat_ratio = config.enter_on_density_eat_ratio,
            "Density detector initialized"
        );
        Self {
            config,
            symbols: HashMap::new(),
            event_tx: None,
        }
    }

    /// Attach a bounded event sink.
    pub fn with_event_sink(mut self, tx: mpsc::Sender<DensityEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Detect current densities from a book snapshot without mutating
    /// tracking state (other than the median window).
    pub fn detect(&mut self, symbol: &Symbol, snapshot: &OrderBookSnapshot) -> Vec<DensityLevel> {
        let Some(mid) = snapshot.mid() else {
            return Vec::new();
        };
        let now_ms = snapshot.ts_ms;

        let bid_buckets = self.aggregate_buckets(snapshot, mid, BookSide::Bid);
        let ask_buckets = self.aggregate_buckets(snapshot, mid, BookSide::Ask);

        let state = self
            .symbols
            .entry(symbol.clone())
            .or_insert_with(SymbolState::new);

        // Feed the median window with every bucket size from this pass.
        let all_sizes: Vec<f64> = bid_buckets
            .iter()
            .chain(ask_buckets.iter())
            .map(|(_, size)| *size)
            .collect();
        if !all_sizes.is_empty() {
            state.bucket_history.push_back((now_ms, all_sizes));
        }
        let cutoff = now_ms - self.config.lookback_window_s * 1000;
        while state
            .bucket_history
            .front()
            .map(|(ts, _)| *ts < cutoff)
            .unwrap_or(false)
        {
            state.bucket_history.pop_front();
        }

        let threshold = Self::threshold(&self.config, state, cutoff);
        if threshold <= 0.0 {
            return Vec::new();
        }

        let mut densities = Vec::new();
        for (side, buckets) in [(BookSide::Bid, &bid_buckets), (BookSide::Ask, &ask_buckets)] {
            for (price, size) in buckets {
                if *size >= threshold {
                    densities.push(DensityLevel {
                        price: *price,
                        side,
                        size: *size,
                        strength: size / threshold,
                        ts_ms: now_ms,
                        initial_size: *size,
                    });
                }
            }
        }
        densities
    }

    /// Re-detect and reconcile with previously tracked densities,
    /// emitting lifecycle events.
    pub fn update_tracked(
        &mut self,
        symbol: &Symbol,
        snapshot: &OrderBookSnapshot,
    ) -> Vec<DensityEvent> {
        let current = self.detect(symbol, snapshot);
        let now_ms = snapshot.ts_ms;
        let eat_ratio = self.config.enter_on_density_eat_ratio;

        let state = self
            .symbols
            .entry(symbol.clone())
            .or_insert_with(SymbolState::new);
        let previous = std::mem::take(&mut state.densities);

        let mut events = Vec::new();
        let mut updated: Vec<DensityLevel> = Vec::new();

        for prev in &previous {
            let matched = current
                .iter()
                .find(|c| c.side == prev.side && matches_price(c.price, prev.price));

            match matched {
                Some(curr) => {
                    let mut kept = curr.clone();
                    kept.initial_size = prev.initial_size;

                    if kept.eaten_ratio() >= eat_ratio {
                        info!(
                            %symbol,
                            side = ?kept.side,
                            price = kept.price,
                            eaten = kept.eaten_ratio(),
                            "Density eaten"
                        );
                        events.push(DensityEvent {
                            kind: DensityEventKind::Eaten,
                            symbol: symbol.clone(),
                            density: kept.clone(),
                            ts_ms: now_ms,
                        });
                    }
                    updated.push(kept);
                }
                None => {
                    events.push(DensityEvent {
                        kind: DensityEventKind::Removed,
                        symbol: symbol.clone(),
                        density: prev.clone(),
                        ts_ms: now_ms,
                    });
                }
            }
        }

        for curr in &current {
            let is_new = !previous
                .iter()
                .any(|p| p.side == curr.side && matches_price(curr.price, p.price));
            if is_new {
                debug!(
                    %symbol,
                    side = ?curr.side,
                    price = curr.price,
                    strength = curr.strength,
                    "New density detected"
                );
                events.push(DensityEvent {
                    kind: DensityEventKind::Detected,
                    symbol: symbol.clone(),
                    density: curr.clone(),
                    ts_ms: now_ms,
                });
                updated.push(curr.clone());
            }
        }

        state.densities = updated;

        if let Some(tx) = &self.event_tx {
            for event in &events {
                // try_send keeps the callback path non-blocking.
                let _ = tx.try_send(event.clone());
            }
        }
        events
    }

    /// Currently tracked densities for a symbol.
    pub fn densities(&self, symbol: &Symbol) -> &[DensityLevel] {
        self.symbols
            .get(symbol)
            .map(|s| s.densities.as_slice())
            .unwrap_or(&[])
    }

    /// Tracked density near a price, within `tolerance_bps`.
    pub fn density_at_price(
        &self,
        symbol: &Symbol,
        price: f64,
        side: BookSide,
        tolerance_bps: f64,
    ) -> Option<&DensityLevel> {
        if price <= 0.0 {
            return None;
        }
        self.symbols.get(symbol)?.densities.iter().find(|d| {
            d.side == side && (d.price - price).abs() / price * 10_000.0 <= tolerance_bps
        })
    }

    /// Drop all state for a symbol.
    pub fn forget(&mut self, symbol: &Symbol) {
        self.symbols.remove(symbol);
    }

    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    fn threshold(config: &DensityConfig, state: &SymbolState, cutoff: i64) -> f64 {
        let sizes: Vec<f64> = state
            .bucket_history
            .iter()
            .filter(|(ts, _)| *ts >= cutoff)
            .flat_map(|(_, sizes)| sizes.iter().copied())
            .collect();
        if sizes.is_empty() {
            return 0.0;
        }
        indicators::median(&sizes) * config.k_density
    }

    /// Aggregate one side of the book into price buckets within range.
    fn aggregate_buckets(
        &self,
        snapshot: &OrderBookSnapshot,
        mid: f64,
        side: BookSide,
    ) -> Vec<(f64, f64)> {
        let tick = mid * 0.0001;
        let bucket_size = tick * self.config.bucket_ticks as f64;
        if bucket_size <= 0.0 {
            return Vec::new();
        }

        let (levels, limit) = match side {
            BookSide::Bid => (
                &snapshot.bids,
                mid * (1.0 - self.config.range_bps / 10_000.0),
            ),
            BookSide::Ask => (
                &snapshot.asks,
                mid * (1.0 + self.config.range_bps / 10_000.0),
            ),
        };

        let mut buckets: HashMap<i64, f64> = HashMap::new();
        for level in levels {
            let in_range = match side {
                BookSide::Bid => level.price >= limit,
                BookSide::Ask => level.price <= limit,
            };
            if !in_range {
                break;
            }
            let key = (level.price / bucket_size).round() as i64;
            *buckets.entry(key).or_insert(0.0) += level.size;
        }

        let mut out: Vec<(f64, f64)> = buckets
            .into_iter()
            .map(|(key, size)| (key as f64 * bucket_size, size))
            .collect();
        out.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        if side == BookSide::Bid {
            out.reverse();
        }
        out
    }
}

/// Two prices match when within 0.1% of the reference.
fn matches_price(a: f64, reference: f64) -> bool {
    if reference <= 0.0 {
        return false;
    }
    (a - reference).abs() / reference < 0.001
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::BookLevel;

    fn wall_snapshot(ts_ms: i64, wall_size: f64) -> OrderBookSnapshot {
        // A flat book of 1.0-size levels with one oversized bid level.
        let mut bids: Vec<BookLevel> = (1..=20)
            .map(|i| BookLevel::new(100.0 - i as f64 * 0.01, 1.0))
            .collect();
        bids.insert(4, BookLevel::new(99.95, wall_size));
        let asks: Vec<BookLevel> = (1..=20)
            .map(|i| BookLevel::new(100.0 + i as f64 * 0.01, 1.0))
            .collect();
        OrderBookSnapshot::new(ts_ms, bids, asks, 1)
    }

    fn detector() -> DensityDetector {
        DensityDetector::new(DensityConfig {
            k_density: 2.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_wall_detected_and_eaten() {
        let mut det = detector();
        let sym = Symbol::new("BTCUSDT");

        let events = det.update_tracked(&sym, &wall_snapshot(1_000, 50.0));
        let detected: Vec<_> = events
            .iter()
            .filter(|e| e.kind == DensityEventKind::Detected)
            .collect();
        assert!(!detected.is_empty());
        assert!(detected.iter().any(|e| e.density.side == BookSide::Bid));

        // Wall shrinks below 25% of its initial size: eaten.
        let events = det.update_tracked(&sym, &wall_snapshot(2_000, 10.0));
        assert!(events.iter().any(|e| e.kind == DensityEventKind::Eaten));
    }

    #[test]
    fn test_eaten_ratio_is_bounded() {
        let level = DensityLevel {
            price: 100.0,
            side: BookSide::Bid,
            size: 150.0,
            strength: 2.0,
            ts_ms: 0,
            initial_size: 100.0,
        };
        // Size grew past initial: ratio clamps at 0 instead of going negative.
        assert_eq!(level.eaten_ratio(), 0.0);

        let gone = DensityLevel {
            size: 0.0,
            ..level
        };
        assert_eq!(gone.eaten_ratio(), 1.0);
    }

    #[test]
    fn test_removed_event_when_wall_vanishes() {
        let mut det = detector();
        let sym = Symbol::new("ETHUSDT");

        det.update_tracked(&sym, &wall_snapshot(1_000, 50.0));
        // Flat book, wall gone entirely.
        let flat = OrderBookSnapshot::new(
            2_000,
            (1..=20)
                .map(|i| BookLevel::new(100.0 - i as f64 * 0.01, 1.0))
                .collect(),
            (1..=20)
                .map(|i| BookLevel::new(100.0 + i as f64 * 0.01, 1.0))
                .collect(),
            2,
        );
        let events = det.update_tracked(&sym, &flat);
        assert!(events.iter().any(|e| e.kind == DensityEventKind::Removed));
    }

    #[test]
    fn test_density_at_price_lookup() {
        let mut det = detector();
        let sym = Symbol::new("SOLUSDT");
        det.update_tracked(&sym, &wall_snapshot(1_000, 50.0));

        assert!(det
            .density_at_price(&sym, 99.95, BookSide::Bid, 10.0)
            .is_some());
        assert!(det
            .density_at_price(&sym, 99.95, BookSide::Ask, 10.0)
            .is_none());
        assert!(det
            .density_at_price(&sym, 90.0, BookSide::Bid, 10.0)
            .is_none());
    }

    #[tokio::test]
    async fn test_events_reach_bounded_sink() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut det = detector().with_event_sink(tx);
        let sym = Symbol::new("XRPUSDT");

        det.update_tracked(&sym, &wall_snapshot(1_000, 50.0));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, DensityEventKind::Detected);
    }
}
