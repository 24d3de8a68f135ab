//! Breakout history.
//!
//! Per-symbol deque of recorded breakouts with a 7-day TTL. The position
//! manager records an entry whenever a breakout position opens; the
//! retest strategy consumes it to require a matching prior breakout.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use bbot_core::{Side, Symbol};

/// Retention for recorded breakouts.
const HISTORY_TTL_MS: i64 = 7 * 24 * 3600 * 1000;

/// One recorded breakout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakoutRecord {
    pub ts_ms: i64,
    pub level_price: f64,
    pub side: Side,
}

/// Per-symbol breakout records.
#[derive(Debug, Default)]
pub struct BreakoutHistory {
    records: HashMap<Symbol, VecDeque<BreakoutRecord>>,
}

impl BreakoutHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, symbol: Symbol, record: BreakoutRecord) {
        let queue = self.records.entry(symbol).or_default();
        queue.push_back(record);
        Self::evict(queue, record.ts_ms);
    }

    /// Latest breakout matching level and side within `window_ms`.
    ///
    /// The level matches when within `tolerance_frac` of the recorded
    /// price.
    pub fn matching_breakout(
        &self,
        symbol: &Symbol,
        level_price: f64,
        side: Side,
        tolerance_frac: f64,
        window_ms: i64,
        now_ms: i64,
    ) -> Option<BreakoutRecord> {
        let queue = self.records.get(symbol)?;
        queue
            .iter()
            .rev()
            .filter(|r| now_ms - r.ts_ms <= window_ms)
            .find(|r| {
                r.side == side
                    && r.level_price > 0.0
                    && (r.level_price - level_price).abs() / r.level_price <= tolerance_frac
            })
            .copied()
    }

    /// All live records for a symbol, oldest first.
    pub fn records(&self, symbol: &Symbol) -> Vec<BreakoutRecord> {
        self.records
            .get(symbol)
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop expired records across all symbols.
    pub fn purge(&mut self, now_ms: i64) {
        for queue in self.records.values_mut() {
            Self::evict(queue, now_ms);
        }
        self.records.retain(|_, q| !q.is_empty());
    }

    fn evict(queue: &mut VecDeque<BreakoutRecord>, now_ms: i64) {
        while queue
            .front()
            .map(|r| now_ms - r.ts_ms > HISTORY_TTL_MS)
            .unwrap_or(false)
        {
            queue.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 24 * 3600 * 1000;

    #[test]
    fn test_matching_breakout_within_window() {
        let mut history = BreakoutHistory::new();
        let sym = Symbol::new("BTCUSDT");
        history.record(
            sym.clone(),
            BreakoutRecord {
                ts_ms: 1_000,
                level_price: 50.5,
                side: Side::Long,
            },
        );

        let hit = history.matching_breakout(&sym, 50.52, Side::Long, 0.005, DAY_MS, 2_000);
        assert!(hit.is_some());

        // Wrong side never matches.
        assert!(history
            .matching_breakout(&sym, 50.52, Side::Short, 0.005, DAY_MS, 2_000)
            .is_none());

        // Outside the 24h window.
        assert!(history
            .matching_breakout(&sym, 50.52, Side::Long, 0.005, DAY_MS, DAY_MS + 2_000)
            .is_none());
    }

    #[test]
    fn test_records_expire_after_ttl() {
        let mut history = BreakoutHistory::new();
        let sym = Symbol::new("ETHUSDT");
        history.record(
            sym.clone(),
            BreakoutRecord {
                ts_ms: 0,
                level_price: 100.0,
                side: Side::Long,
            },
        );
        history.purge(8 * DAY_MS);
        assert!(history.records(&sym).is_empty());
    }
}
