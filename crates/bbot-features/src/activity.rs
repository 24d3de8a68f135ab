//! Trading activity index and decay detection.
//!
//! The activity index is the sum of z-scores of TPM(60s), TPS(10s) and
//! |volume delta(60s)| against a rolling history. All three contribute
//! symmetrically. A drop is flagged when the current index falls a
//! configured fraction below the mean of the previous points.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use bbot_core::{indicators, Symbol};

/// Activity tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// History length per symbol, in update periods.
    pub lookback_periods: usize,
    /// Drop fraction at which decay is flagged.
    pub drop_threshold: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            lookback_periods: 60,
            drop_threshold: 0.3,
        }
    }
}

/// Raw inputs for one activity update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivitySample {
    pub tpm_60s: f64,
    pub tps_10s: f64,
    /// Absolute 60 s volume delta.
    pub vol_delta_abs: f64,
}

/// Activity metrics for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivityMetrics {
    /// Sum of the three z-scores.
    pub activity_index: f64,
    pub tpm_60s_z: f64,
    pub tps_10s_z: f64,
    pub vol_delta_z: f64,
    pub is_dropping: bool,
    pub drop_fraction: f64,
    pub last_update: i64,
}

/// Emitted when a symbol's activity starts dropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDropEvent {
    pub symbol: Symbol,
    pub drop_fraction: f64,
    pub activity_index: f64,
    pub ts_ms: i64,
}

/// Minimum history points before drop detection engages.
const DROP_MIN_HISTORY: usize = 10;

struct SymbolHistory {
    samples: VecDeque<ActivitySample>,
    metrics: ActivityMetrics,
    was_dropping: bool,
}

/// Tracks per-symbol activity and detects momentum decay.
pub struct ActivityTracker {
    config: ActivityConfig,
    symbols: HashMap<Symbol, SymbolHistory>,
    event_tx: Option<mpsc::Sender<ActivityDropEvent>>,
}

impl ActivityTracker {
    pub fn new(config: ActivityConfig) -> Self {
        info!(
            lookback = config.lookback_periods,
            drop_threshold = config.drop_threshold,
            "Activity tracker initialized"
        );
        Self {
            config,
            symbols: HashMap::new(),
            event_tx: None,
        }
    }

    /// Attach a bounded sink receiving drop-onset events.
    pub fn with_event_sink(mut self, tx: mpsc::Sender<ActivityDropEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Incorporate a fresh sample and recompute metrics.
    pub fn update(&mut self, symbol: &Symbol, sample: ActivitySample, now_ms: i64) -> ActivityMetrics {
        let lookback = self.config.lookback_periods;
        let state = self
            .symbols
            .entry(symbol.clone())
            .or_insert_with(|| SymbolHistory {
                samples: VecDeque::with_capacity(lookback),
                metrics: ActivityMetrics::default(),
                was_dropping: false,
            });

        if state.samples.len() == lookback {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);

        let tpm: Vec<f64> = state.samples.iter().map(|s| s.tpm_60s).collect();
        let tps: Vec<f64> = state.samples.iter().map(|s| s.tps_10s).collect();
        let vol: Vec<f64> = state.samples.iter().map(|s| s.vol_delta_abs).collect();

        let tpm_z = z_score(&tpm, sample.tpm_60s);
        let tps_z = z_score(&tps, sample.tps_10s);
        let vol_z = z_score(&vol, sample.vol_delta_abs);
        let activity_index = tpm_z + tps_z + vol_z;

        let (is_dropping, drop_fraction) =
            check_drop(&tpm, &tps, &vol, activity_index, self.config.drop_threshold);

        let metrics = ActivityMetrics {
            activity_index,
            tpm_60s_z: tpm_z,
            tps_10s_z: tps_z,
            vol_delta_z: vol_z,
            is_dropping,
            drop_fraction,
            last_update: now_ms.max(state.metrics.last_update),
        };

        if is_dropping && !state.was_dropping {
            debug!(%symbol, drop_fraction, "Activity drop onset");
            if let Some(tx) = &self.event_tx {
                let _ = tx.try_send(ActivityDropEvent {
                    symbol: symbol.clone(),
                    drop_fraction,
                    activity_index,
                    ts_ms: now_ms,
                });
            }
        }
        state.was_dropping = is_dropping;
        state.metrics = metrics;
        metrics
    }

    pub fn metrics(&self, symbol: &Symbol) -> Option<ActivityMetrics> {
        self.symbols.get(symbol).map(|s| s.metrics)
    }

    pub fn activity_index(&self, symbol: &Symbol) -> f64 {
        self.metrics(symbol)
            .map(|m| m.activity_index)
            .unwrap_or(0.0)
    }

    /// Whether activity is dropping, optionally against a custom fraction.
    pub fn is_dropping(&self, symbol: &Symbol, drop_frac: Option<f64>) -> bool {
        match (self.metrics(symbol), drop_frac) {
            (Some(m), Some(frac)) => m.drop_fraction >= frac,
            (Some(m), None) => m.is_dropping,
            (None, _) => false,
        }
    }

    pub fn forget(&mut self, symbol: &Symbol) {
        self.symbols.remove(symbol);
    }

    /// Shrink histories to at most `keep` points per symbol.
    pub fn compact(&mut self, keep: usize) {
        for state in self.symbols.values_mut() {
            while state.samples.len() > keep {
                state.samples.pop_front();
            }
        }
    }
}

/// Z-score of `value` against the history. Degenerate history yields 0.
fn z_score(history: &[f64], value: f64) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let std = indicators::std_dev(history);
    if std == 0.0 {
        return 0.0;
    }
    (value - indicators::mean(history)) / std
}

/// Rebuild the index series from stored samples against the current
/// window statistics, then compare the current point to the mean of the
/// preceding ones.
fn check_drop(
    tpm: &[f64],
    tps: &[f64],
    vol: &[f64],
    current: f64,
    threshold: f64,
) -> (bool, f64) {
    let n = tpm.len();
    if n < DROP_MIN_HISTORY {
        return (false, 0.0);
    }

    let indices: Vec<f64> = (0..n)
        .map(|i| z_score(tpm, tpm[i]) + z_score(tps, tps[i]) + z_score(vol, vol[i]))
        .collect();

    let window = &indices[n.saturating_sub(DROP_MIN_HISTORY)..n - 1];
    let prev_mean = indicators::mean(window);
    if prev_mean <= 0.0 {
        return (false, 0.0);
    }

    let drop_fraction = (prev_mean - current) / prev_mean.abs();
    (drop_fraction >= threshold, drop_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tpm: f64, tps: f64, vol: f64) -> ActivitySample {
        ActivitySample {
            tpm_60s: tpm,
            tps_10s: tps,
            vol_delta_abs: vol,
        }
    }

    #[test]
    fn test_index_zero_with_short_history() {
        let mut tracker = ActivityTracker::new(ActivityConfig::default());
        let sym = Symbol::new("BTCUSDT");
        let m = tracker.update(&sym, sample(10.0, 1.0, 5.0), 1_000);
        assert_eq!(m.activity_index, 0.0);
    }

    #[test]
    fn test_index_zero_with_zero_stdev() {
        let mut tracker = ActivityTracker::new(ActivityConfig::default());
        let sym = Symbol::new("BTCUSDT");
        for i in 0..5 {
            tracker.update(&sym, sample(10.0, 1.0, 5.0), 1_000 + i);
        }
        let m = tracker.metrics(&sym).unwrap();
        assert_eq!(m.activity_index, 0.0);
    }

    #[test]
    fn test_index_finite_and_positive_on_spike() {
        let mut tracker = ActivityTracker::new(ActivityConfig::default());
        let sym = Symbol::new("BTCUSDT");
        for i in 0..20 {
            let wiggle = (i % 3) as f64 * 0.1;
            tracker.update(&sym, sample(10.0 + wiggle, 1.0 + wiggle, 5.0 + wiggle), i);
        }
        let m = tracker.update(&sym, sample(30.0, 4.0, 25.0), 21);
        assert!(m.activity_index.is_finite());
        assert!(m.activity_index > 0.0);
    }

    #[test]
    fn test_drop_detected_after_surge_fades() {
        let mut tracker = ActivityTracker::new(ActivityConfig {
            lookback_periods: 60,
            drop_threshold: 0.3,
        });
        let sym = Symbol::new("ETHUSDT");

        // Active phase with variation, then a stall.
        for i in 0..15 {
            let level = 20.0 + (i % 4) as f64;
            tracker.update(&sym, sample(level, level / 10.0, level / 2.0), i);
        }
        let m = tracker.update(&sym, sample(0.5, 0.05, 0.1), 100);
        assert!(m.drop_fraction > 0.0);
        assert!(m.is_dropping);
    }

    #[test]
    fn test_last_update_monotonic() {
        let mut tracker = ActivityTracker::new(ActivityConfig::default());
        let sym = Symbol::new("SOLUSDT");
        tracker.update(&sym, sample(1.0, 1.0, 1.0), 5_000);
        let m = tracker.update(&sym, sample(1.0, 1.0, 1.0), 4_000);
        assert_eq!(m.last_update, 5_000);
    }
}
