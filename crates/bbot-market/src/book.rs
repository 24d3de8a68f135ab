//! Per-symbol order book maintenance.
//!
//! The manager owns every snapshot exclusively. Deltas apply in venue
//! sequence; a gap in `update_id` drops the symbol's state and reports
//! `Resync` so the caller can seed a fresh REST snapshot. Readers always
//! receive a consistent clone.

use dashmap::DashMap;
use tracing::{debug, warn};

use bbot_core::{BookLevel, L2Depth, OrderBookSnapshot, Symbol, TradeSide};
use bbot_venue::BookMessage;

/// Outcome of applying one stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Stale or duplicate update, ignored.
    Ignored,
    /// Sequence gap: state dropped, caller must fetch a REST snapshot.
    Resync,
}

/// Order book manager for all subscribed symbols.
pub struct OrderBookManager {
    books: DashMap<Symbol, OrderBookSnapshot>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    /// Replace a symbol's book outright, e.g. from a REST seed.
    pub fn update_snapshot(&self, symbol: Symbol, snapshot: OrderBookSnapshot) {
        self.books.insert(symbol, snapshot);
    }

    /// Apply a stream message for a symbol.
    pub fn apply(&self, symbol: &Symbol, ts_ms: i64, message: BookMessage) -> ApplyOutcome {
        match message {
            BookMessage::Snapshot {
                bids,
                asks,
                update_id,
            } => {
                self.books.insert(
                    symbol.clone(),
                    OrderBookSnapshot::new(ts_ms, bids, asks, update_id),
                );
                ApplyOutcome::Applied
            }
            BookMessage::Delta {
                bids,
                asks,
                update_id,
            } => {
                let Some(mut book) = self.books.get_mut(symbol) else {
                    // Delta before any snapshot: need a seed.
                    return ApplyOutcome::Resync;
                };

                if update_id <= book.update_id {
                    return ApplyOutcome::Ignored;
                }
                if update_id != book.update_id + 1 {
                    warn!(
                        %symbol,
                        expected = book.update_id + 1,
                        got = update_id,
                        "Order book sequence gap, dropping state"
                    );
                    drop(book);
                    self.books.remove(symbol);
                    return ApplyOutcome::Resync;
                }

                apply_side(&mut book.bids, &bids, true);
                apply_side(&mut book.asks, &asks, false);
                book.update_id = update_id;
                book.ts_ms = ts_ms;
                debug!(%symbol, update_id, "Delta applied");
                ApplyOutcome::Applied
            }
        }
    }

    /// Consistent snapshot clone for a symbol.
    pub fn snapshot(&self, symbol: &Symbol) -> Option<OrderBookSnapshot> {
        self.books.get(symbol).map(|b| b.clone())
    }

    /// Cumulative base size on one side within `range_bps` of the touch.
    pub fn aggregated_depth(&self, symbol: &Symbol, side: TradeSide, range_bps: f64) -> f64 {
        let Some(book) = self.books.get(symbol) else {
            return 0.0;
        };
        let (levels, reference) = match side {
            TradeSide::Buy => (&book.bids, book.best_bid()),
            TradeSide::Sell => (&book.asks, book.best_ask()),
        };
        let Some(reference) = reference else {
            return 0.0;
        };
        let band = reference * range_bps / 10_000.0;
        levels
            .iter()
            .take_while(|level| (level.price - reference).abs() <= band)
            .map(|level| level.size)
            .sum()
    }

    /// Book imbalance within `range_bps`: (bid - ask) / (bid + ask).
    pub fn imbalance(&self, symbol: &Symbol, range_bps: f64) -> f64 {
        let bid = self.aggregated_depth(symbol, TradeSide::Buy, range_bps);
        let ask = self.aggregated_depth(symbol, TradeSide::Sell, range_bps);
        let total = bid + ask;
        if total <= 0.0 {
            return 0.0;
        }
        (bid - ask) / total
    }

    /// Derive the L2 depth summary used by the scanner. `None` when the
    /// book is missing or one-sided.
    pub fn l2_depth(&self, symbol: &Symbol) -> Option<L2Depth> {
        let book = self.books.get(symbol)?;
        let mid = book.mid()?;
        let spread_bps = book.spread_bps()?;

        let usd_within = |levels: &[BookLevel], range_frac: f64, below: bool| -> f64 {
            let limit = if below {
                mid * (1.0 - range_frac)
            } else {
                mid * (1.0 + range_frac)
            };
            levels
                .iter()
                .take_while(|l| if below { l.price >= limit } else { l.price <= limit })
                .map(|l| l.notional())
                .sum()
        };

        let bid_usd_0_5pct = usd_within(&book.bids, 0.005, true);
        let ask_usd_0_5pct = usd_within(&book.asks, 0.005, false);
        let bid_usd_0_3pct = usd_within(&book.bids, 0.003, true);
        let ask_usd_0_3pct = usd_within(&book.asks, 0.003, false);

        let total = bid_usd_0_5pct + ask_usd_0_5pct;
        let imbalance = if total > 0.0 {
            (bid_usd_0_5pct - ask_usd_0_5pct) / total
        } else {
            0.0
        };

        Some(L2Depth {
            bid_usd_0_5pct,
            ask_usd_0_5pct,
            bid_usd_0_3pct,
            ask_usd_0_3pct,
            spread_bps,
            imbalance,
        })
    }

    pub fn drop_symbol(&self, symbol: &Symbol) {
        self.books.remove(symbol);
    }

    pub fn tracked_count(&self) -> usize {
        self.books.len()
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge delta levels into one book side. Size zero deletes the price.
fn apply_side(side: &mut Vec<BookLevel>, changes: &[BookLevel], descending: bool) {
    for change in changes {
        let pos = side.iter().position(|l| l.price == change.price);
        match (pos, change.size > 0.0) {
            (Some(i), true) => side[i] = *change,
            (Some(i), false) => {
                side.remove(i);
            }
            (None, true) => {
                let insert_at = side
                    .iter()
                    .position(|l| {
                        if descending {
                            l.price < change.price
                        } else {
                            l.price > change.price
                        }
                    })
                    .unwrap_or(side.len());
                side.insert(insert_at, *change);
            }
            (None, false) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(manager: &OrderBookManager, sym: &Symbol) {
        manager.apply(
            sym,
            1_000,
            BookMessage::Snapshot {
                bids: vec![BookLevel::new(100.0, 5.0), BookLevel::new(99.9, 10.0)],
                asks: vec![BookLevel::new(100.1, 4.0), BookLevel::new(100.2, 8.0)],
                update_id: 10,
            },
        );
    }

    #[test]
    fn test_delta_applies_in_sequence() {
        let manager = OrderBookManager::new();
        let sym = Symbol::new("BTCUSDT");
        seed(&manager, &sym);

        let outcome = manager.apply(
            &sym,
            1_100,
            BookMessage::Delta {
                bids: vec![BookLevel::new(100.0, 2.0)],
                asks: vec![BookLevel::new(100.1, 0.0)],
                update_id: 11,
            },
        );
        assert_eq!(outcome, ApplyOutcome::Applied);

        let book = manager.snapshot(&sym).unwrap();
        assert_eq!(book.bids[0].size, 2.0);
        // The 100.1 ask was deleted; 100.2 is now best.
        assert_eq!(book.best_ask(), Some(100.2));
        assert_eq!(book.update_id, 11);
    }

    #[test]
    fn test_gap_forces_resync_and_drops_state() {
        let manager = OrderBookManager::new();
        let sym = Symbol::new("BTCUSDT");
        seed(&manager, &sym);

        let outcome = manager.apply(
            &sym,
            1_100,
            BookMessage::Delta {
                bids: vec![],
                asks: vec![],
                update_id: 13,
            },
        );
        assert_eq!(outcome, ApplyOutcome::Resync);
        assert!(manager.snapshot(&sym).is_none());
    }

    #[test]
    fn test_stale_delta_ignored() {
        let manager = OrderBookManager::new();
        let sym = Symbol::new("BTCUSDT");
        seed(&manager, &sym);

        let outcome = manager.apply(
            &sym,
            1_100,
            BookMessage::Delta {
                bids: vec![],
                asks: vec![],
                update_id: 10,
            },
        );
        assert_eq!(outcome, ApplyOutcome::Ignored);
    }

    #[test]
    fn test_delta_inserts_new_level_in_order() {
        let manager = OrderBookManager::new();
        let sym = Symbol::new("BTCUSDT");
        seed(&manager, &sym);

        manager.apply(
            &sym,
            1_100,
            BookMessage::Delta {
                bids: vec![BookLevel::new(99.95, 3.0)],
                asks: vec![],
                update_id: 11,
            },
        );
        let book = manager.snapshot(&sym).unwrap();
        let prices: Vec<f64> = book.bids.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![100.0, 99.95, 99.9]);
    }

    #[test]
    fn test_imbalance_bounds() {
        let manager = OrderBookManager::new();
        let sym = Symbol::new("BTCUSDT");
        seed(&manager, &sym);

        let imb = manager.imbalance(&sym, 100.0);
        assert!((-1.0..=1.0).contains(&imb));
        // Bids within 1% total 15, asks total 12.
        assert!(imb > 0.0);
    }

    #[test]
    fn test_l2_depth_derivation() {
        let manager = OrderBookManager::new();
        let sym = Symbol::new("BTCUSDT");
        seed(&manager, &sym);

        let depth = manager.l2_depth(&sym).unwrap();
        assert!(depth.bid_usd_0_5pct > 0.0);
        assert!(depth.spread_bps > 0.0);
        assert!((-1.0..=1.0).contains(&depth.imbalance));
    }

    #[test]
    fn test_delta_before_snapshot_requests_resync() {
        let manager = OrderBookManager::new();
        let sym = Symbol::new("NEWUSDT");
        let outcome = manager.apply(
            &sym,
            1_000,
            BookMessage::Delta {
                bids: vec![],
                asks: vec![],
                update_id: 5,
            },
        );
        assert_eq!(outcome, ApplyOutcome::Resync);
    }
}
