//! Horizontal level detection.
//!
//! Clusters candle highs and lows into support/resistance levels using
//! an ATR-derived tolerance band. Strength combines touch count, touch
//! recency and an optional round-number bonus. Levels packed tightly
//! with neighbours are flagged as cascades. The approach-quality test
//! scores the bars leading into a level touch.

use serde::{Deserialize, Serialize};
use tracing::debug;

use bbot_core::{indicators, Candle, LevelKind, TradingLevel};

/// Level detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelConfig {
    /// Minimum touches for a cluster to become a level.
    pub min_touches: u32,
    /// Cluster tolerance as a multiple of ATR.
    pub tolerance_atr_mult: f64,
    pub prefer_round_numbers: bool,
    /// Price steps checked for round-number proximity.
    pub round_step_candidates: Vec<f64>,
    /// Distance to a round step, as a fraction of price, that counts.
    pub round_distance_frac: f64,
    /// Strength bonus for round-number levels.
    pub round_bonus: f64,
    /// Neighbours within the radius needed to flag a cascade.
    pub cascade_min_levels: u32,
    pub cascade_radius_bps: f64,
    /// Maximum approach slope, percent per bar.
    pub approach_max_slope_pct: f64,
    pub approach_min_consolidation_bars: u32,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            min_touches: 2,
            tolerance_atr_mult: 0.5,
            prefer_round_numbers: true,
            round_step_candidates: vec![1000.0, 100.0, 10.0, 1.0],
            round_distance_frac: 0.0005,
            round_bonus: 0.1,
            cascade_min_levels: 3,
            cascade_radius_bps: 15.0,
            approach_max_slope_pct: 1.2,
            approach_min_consolidation_bars: 3,
        }
    }
}

/// Result of the approach-quality test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachQuality {
    pub valid: bool,
    pub slope_pct_per_bar: f64,
    pub consolidation_bars: u32,
    pub reason: String,
}

/// ATR period used for the tolerance band.
const ATR_PERIOD: usize = 14;

/// Detects horizontal levels from candle history.
pub struct LevelDetector {
    config: LevelConfig,
}

impl LevelDetector {
    pub fn new(config: LevelConfig) -> Self {
        Self { config }
    }

    /// Cluster highs and lows into levels. Empty or short input yields
    /// no levels.
    pub fn detect_levels(&self, candles: &[Candle]) -> Vec<TradingLevel> {
        if candles.len() < ATR_PERIOD + 1 {
            return Vec::new();
        }
        let Some(atr) = indicators::atr(candles, ATR_PERIOD) else {
            return Vec::new();
        };
        let tolerance = atr * self.config.tolerance_atr_mult;
        if tolerance <= 0.0 {
            return Vec::new();
        }

        let highs: Vec<(i64, f64)> = candles.iter().map(|c| (c.ts_ms, c.high)).collect();
        let lows: Vec<(i64, f64)> = candles.iter().map(|c| (c.ts_ms, c.low)).collect();

        let mut levels = Vec::new();
        levels.extend(self.cluster(&highs, tolerance, LevelKind::Resistance, candles));
        levels.extend(self.cluster(&lows, tolerance, LevelKind::Support, candles));

        self.flag_cascades(&mut levels);
        levels.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(count = levels.len(), "Levels detected");
        levels
    }

    /// Greedy clustering of touch prices within the tolerance band.
    fn cluster(
        &self,
        touches: &[(i64, f64)],
        tolerance: f64,
        kind: LevelKind,
        candles: &[Candle],
    ) -> Vec<TradingLevel> {
        let mut sorted: Vec<(i64, f64)> = touches.to_vec();
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let last_ts = candles.last().map(|c| c.ts_ms).unwrap_or(0);
        let first_ts = candles.first().map(|c| c.ts_ms).unwrap_or(0);
        let span = (last_ts - first_ts).max(1) as f64;

        let mut levels = Vec::new();
        let mut cluster: Vec<(i64, f64)> = Vec::new();

        let mut flush = |cluster: &mut Vec<(i64, f64)>, levels: &mut Vec<TradingLevel>| {
            if cluster.len() >= self.config.min_touches as usize {
                let prices: Vec<f64> = cluster.iter().map(|t| t.1).collect();
                let price = indicators::mean(&prices);
                let first_touch = cluster.iter().map(|t| t.0).min().unwrap_or(0);
                let last_touch = cluster.iter().map(|t| t.0).max().unwrap_or(0);

                let touch_count = cluster.len() as u32;
                let touch_term = (touch_count as f64 / 5.0).min(1.0) * 0.6;
                // Recent last touches score higher.
                let recency = 1.0 - ((last_ts - last_touch) as f64 / span).clamp(0.0, 1.0);
                let recency_term = recency * 0.3;

                let (is_round, round_bonus) = if self.config.prefer_round_numbers {
                    self.round_number_bonus(price)
                } else {
                    (false, 0.0)
                };

                let strength = (touch_term + recency_term + round_bonus).clamp(0.0, 1.0);
                levels.push(TradingLevel {
                    price,
                    kind,
                    touch_count,
                    strength,
                    first_touch_ts: first_touch,
                    last_touch_ts: last_touch,
                    is_round_number: is_round,
                    round_bonus,
                    in_cascade: false,
                    cascade_size: 0,
                });
            }
            cluster.clear();
        };

        for touch in sorted {
            match cluster.last() {
                Some(prev) if (touch.1 - prev.1).abs() <= tolerance => cluster.push(touch),
                Some(_) => {
                    flush(&mut cluster, &mut levels);
                    cluster.push(touch);
                }
                None => cluster.push(touch),
            }
        }
        flush(&mut cluster, &mut levels);
        levels
    }

    /// Bonus when price sits near a multiple of any candidate step.
    fn round_number_bonus(&self, price: f64) -> (bool, f64) {
        if price <= 0.0 {
            return (false, 0.0);
        }
        for step in &self.config.round_step_candidates {
            if *step <= 0.0 || *step > price {
                continue;
            }
            let nearest = (price / step).round() * step;
            if (price - nearest).abs() / price <= self.config.round_distance_frac {
                return (true, self.config.round_bonus);
            }
        }
        (false, 0.0)
    }

    /// Flag levels sitting inside a dense band of neighbours.
    fn flag_cascades(&self, levels: &mut [TradingLevel]) {
        let prices: Vec<f64> = levels.iter().map(|l| l.price).collect();
        for level in levels.iter_mut() {
            let radius = level.price * self.config.cascade_radius_bps / 10_000.0;
            let neighbours = prices
                .iter()
                .filter(|p| (**p - level.price).abs() <= radius)
                .count() as u32;
            if neighbours >= self.config.cascade_min_levels {
                level.in_cascade = true;
                level.cascade_size = neighbours;
            }
        }
    }

    /// Score the bars leading into a touch: a valid approach is shallow
    /// and spends enough bars consolidating in a narrow range.
    pub fn approach_quality(&self, pre_breakout: &[Candle]) -> ApproachQuality {
        if pre_breakout.len() < 2 {
            return ApproachQuality {
                valid: false,
                slope_pct_per_bar: 0.0,
                consolidation_bars: 0,
                reason: "insufficient bars".to_string(),
            };
        }

        let closes: Vec<f64> = pre_breakout.iter().map(|c| c.close).collect();
        let first = closes[0];
        let last = closes[closes.len() - 1];
        let slope_pct_per_bar = if first > 0.0 {
            (last - first) / first * 100.0 / (closes.len() - 1) as f64
        } else {
            0.0
        };

        // Trailing bars whose range stays inside the average range.
        let ranges: Vec<f64> = pre_breakout.iter().map(|c| c.range()).collect();
        let avg_range = indicators::mean(&ranges);
        let consolidation_bars = pre_breakout
            .iter()
            .rev()
            .take_while(|c| c.range() <= avg_range * 1.2)
            .count() as u32;

        let slope_ok = slope_pct_per_bar.abs() <= self.config.approach_max_slope_pct;
        let consolidation_ok = consolidation_bars >= self.config.approach_min_consolidation_bars;

        let reason = match (slope_ok, consolidation_ok) {
            (true, true) => "clean approach".to_string(),
            (false, _) => format!(
                "slope {slope_pct_per_bar:.2}%/bar exceeds {:.2}",
                self.config.approach_max_slope_pct
            ),
            (_, false) => format!(
                "only {consolidation_bars} consolidation bars, need {}",
                self.config.approach_min_consolidation_bars
            ),
        };

        ApproachQuality {
            valid: slope_ok && consolidation_ok,
            slope_pct_per_bar,
            consolidation_bars,
            reason,
        }
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bars oscillating between a 100.0 resistance and 98.0 support.
    fn ranging_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let up = i % 2 == 0;
                let (open, close) = if up { (98.4, 99.9) } else { (99.9, 98.4) };
                Candle::new(i as i64 * 300_000, open, 100.0, 98.0, close, 1_000.0)
            })
            .collect()
    }

    fn detector() -> LevelDetector {
        LevelDetector::new(LevelConfig::default())
    }

    #[test]
    fn test_empty_candles_no_levels() {
        assert!(detector().detect_levels(&[]).is_empty());
    }

    #[test]
    fn test_ranging_market_produces_support_and_resistance() {
        let levels = detector().detect_levels(&ranging_candles(40));
        assert!(levels
            .iter()
            .any(|l| l.kind == LevelKind::Resistance && (l.price - 100.0).abs() < 0.5));
        assert!(levels
            .iter()
            .any(|l| l.kind == LevelKind::Support && (l.price - 98.0).abs() < 0.5));
        for level in &levels {
            assert!(level.touch_count >= 2);
            assert!((0.0..=1.0).contains(&level.strength));
        }
    }

    #[test]
    fn test_round_number_bonus_applies() {
        let det = detector();
        let (is_round, bonus) = det.round_number_bonus(100.0);
        assert!(is_round);
        assert!(bonus > 0.0);

        let (is_round, _) = det.round_number_bonus(103.7137);
        assert!(!is_round);
    }

    #[test]
    fn test_approach_quality_flat_consolidation_is_valid() {
        let candles: Vec<Candle> = (0..8)
            .map(|i| Candle::new(i * 300_000, 99.95, 100.05, 99.95, 100.0, 500.0))
            .collect();
        let quality = detector().approach_quality(&candles);
        assert!(quality.valid);
        assert!(quality.slope_pct_per_bar.abs() < 0.1);
        assert!(quality.consolidation_bars >= 3);
    }

    #[test]
    fn test_approach_quality_steep_run_is_invalid() {
        let candles: Vec<Candle> = (0..6)
            .map(|i| {
                let base = 100.0 + i as f64 * 3.0;
                Candle::new(i * 300_000, base, base + 3.2, base - 0.2, base + 3.0, 500.0)
            })
            .collect();
        let quality = detector().approach_quality(&candles);
        assert!(!quality.valid);
        assert!(quality.slope_pct_per_bar > 1.2);
    }

    #[test]
    fn test_cascade_flagging() {
        let mut levels: Vec<TradingLevel> = [100.00, 100.05, 100.10, 150.0]
            .iter()
            .map(|p| TradingLevel {
                price: *p,
                kind: LevelKind::Resistance,
                touch_count: 2,
                strength: 0.5,
                first_touch_ts: 0,
                last_touch_ts: 0,
                is_round_number: false,
                round_bonus: 0.0,
                in_cascade: false,
                cascade_size: 0,
            })
            .collect();
        detector().flag_cascades(&mut levels);
        // The three clustered levels sit within 15 bps of each other.
        assert!(levels[0].in_cascade);
        assert_eq!(levels[0].cascade_size, 3);
        assert!(!levels[3].in_cascade);
    }
}
