//! Order book snapshot and derived depth metrics.

use serde::{Deserialize, Serialize};

/// A single price level in the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// Consistent order book snapshot.
///
/// Bids are ordered descending by price, asks ascending. Only the book
/// manager mutates snapshots; everyone else receives clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub ts_ms: i64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Venue sequence number of the last applied update.
    pub update_id: u64,
}

impl OrderBookSnapshot {
    pub fn new(ts_ms: i64, bids: Vec<BookLevel>, asks: Vec<BookLevel>, update_id: u64) -> Self {
        Self {
            ts_ms,
            bids,
            asks,
            update_id,
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price. None when either side is empty.
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Spread relative to mid, in basis points. None when book is one-sided.
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b >= a,
            _ => false,
        }
    }
}

/// Aggregated depth snapshot near the touch, in USD notional.
///
/// Absent entirely when the venue gives no depth for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L2Depth {
    pub bid_usd_0_5pct: f64,
    pub ask_usd_0_5pct: f64,
    pub bid_usd_0_3pct: f64,
    pub ask_usd_0_3pct: f64,
    pub spread_bps: f64,
    /// Book imbalance in [-1, 1], positive when bids dominate.
    pub imbalance: f64,
}

impl L2Depth {
    pub fn total_depth_0_5pct(&self) -> f64 {
        self.bid_usd_0_5pct + self.ask_usd_0_5pct
    }

    pub fn total_depth_0_3pct(&self) -> f64 {
        self.bid_usd_0_3pct + self.ask_usd_0_3pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> OrderBookSnapshot {
        OrderBookSnapshot::new(
            1,
            vec![BookLevel::new(99.0, 2.0), BookLevel::new(98.5, 5.0)],
            vec![BookLevel::new(101.0, 1.0), BookLevel::new(101.5, 4.0)],
            7,
        )
    }

    #[test]
    fn test_best_and_mid() {
        let s = snapshot();
        assert_eq!(s.best_bid(), Some(99.0));
        assert_eq!(s.best_ask(), Some(101.0));
        assert_eq!(s.mid(), Some(100.0));
    }

    #[test]
    fn test_spread_bps() {
        let s = snapshot();
        // Spread 2.0 over mid 100.0 is 200 bps.
        assert!((s.spread_bps().unwrap() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_sided_book_has_no_mid() {
        let s = OrderBookSnapshot::new(1, vec![], vec![BookLevel::new(101.0, 1.0)], 1);
        assert!(s.mid().is_none());
        assert!(s.spread_bps().is_none());
    }
}
