//! Pre-entry validation.
//!
//! Runs a prioritised battery of checks on an approved signal before a
//! position goes pending. A failed CRITICAL check invalidates the
//! signal; failures below that produce warnings and shave confidence.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bbot_core::{indicators, Candle, Side, Signal};

use crate::config::{EntryRulesConfig, MarketQualityConfig};

/// Check priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// A `&'static str` behind an alias so the `Deserialize` derive below
/// doesn't see a literal `'static` lifetime in the field type (which
/// would force the derived impl's `'de` parameter to outlive `'static`).
type StaticStr = &'static str;

/// One validation check outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryCheck {
    #[serde(deserialize_with = "deserialize_static_str")]
    pub name: StaticStr,
    pub priority: CheckPriority,
    pub passed: bool,
    pub message: String,
}

fn deserialize_static_str<'de, D>(deserializer: D) -> Result<StaticStr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Box::leak(s.into_boxed_str()))
}

/// Aggregate validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryValidation {
    pub valid: bool,
    pub checks: Vec<EntryCheck>,
    /// Subtract from signal confidence for non-critical failures.
    pub confidence_penalty: f64,
}

/// Inputs the validator needs beyond the signal itself.
#[derive(Debug, Clone, Default)]
pub struct EntryContext {
    /// Recent 5m candles, oldest first.
    pub candles: Vec<Candle>,
    /// Price bands of densities sitting against the trade direction.
    pub opposing_density_zones: Vec<(f64, f64)>,
    /// Bars since the breakout bar crossed the level.
    pub bars_since_breakout: u32,
}

/// Confidence shaved per non-critical failed check, by priority.
fn penalty(priority: CheckPriority) -> f64 {
    match priority {
        CheckPriority::Critical => 0.0,
        CheckPriority::High => 0.15,
        CheckPriority::Medium => 0.08,
        CheckPriority::Low => 0.04,
    }
}

/// Validates signals immediately before entry.
pub struct EntryValidator {
    rules: EntryRulesConfig,
    quality: MarketQualityConfig,
}

impl EntryValidator {
    pub fn new(rules: EntryRulesConfig, quality: MarketQualityConfig) -> Self {
        Self { rules, quality }
    }

    pub fn validate(&self, signal: &Signal, ctx: &EntryContext) -> EntryValidation {
        let mut checks = Vec::new();

        self.check_volume_confirmation(&mut checks, ctx);
        self.check_momentum_slope(&mut checks, ctx);
        self.check_density_avoidance(&mut checks, signal, ctx);
        self.check_clean_breakout(&mut checks, signal, ctx);
        self.check_market_quality(&mut checks, ctx);

        let critical_failure = checks
            .iter()
            .any(|c| !c.passed && c.priority == CheckPriority::Critical);
        let confidence_penalty: f64 = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| penalty(c.priority))
            .sum();

        for check in checks.iter().filter(|c| !c.passed) {
            if check.priority == CheckPriority::Critical {
                warn!(name = check.name, message = %check.message, "Entry check failed (critical)");
            } else {
                debug!(name = check.name, message = %check.message, "Entry check failed");
            }
        }

        EntryValidation {
            valid: !critical_failure,
            checks,
            confidence_penalty: confidence_penalty.min(0.5),
        }
    }

    fn check_volume_confirmation(&self, checks: &mut Vec<EntryCheck>, ctx: &EntryContext) {
        if !self.rules.volume_confirmation_required {
            return;
        }
        let (passed, message) = match ctx.candles.split_last() {
            Some((last, prior)) if prior.len() >= 5 => {
                let volumes: Vec<f64> = prior.iter().rev().take(20).map(|c| c.volume).collect();
                let avg = indicators::mean(&volumes);
                if avg > 0.0 {
                    let ratio = last.volume / avg;
                    (
                        ratio >= self.rules.volume_confirmation_multiplier,
                        format!("trigger volume {ratio:.2}x recent average"),
                    )
                } else {
                    (false, "no recent volume".to_string())
                }
            }
            _ => (false, "insufficient candle history".to_string()),
        };
        checks.push(EntryCheck {
            name: "volume_confirmation",
            priority: CheckPriority::High,
            passed,
            message,
        });
    }

    fn check_momentum_slope(&self, checks: &mut Vec<EntryCheck>, ctx: &EntryContext) {
        let closes: Vec<f64> = ctx.candles.iter().map(|c| c.close).collect();
        let (passed, message) = if closes.len() >= 6 {
            let window = &closes[closes.len() - 6..closes.len() - 1];
            let first = window[0];
            let last = window[window.len() - 1];
            let slope_pct = if first > 0.0 {
                (last - first) / first * 100.0 / (window.len() - 1) as f64
            } else {
                0.0
            };
            (
                slope_pct.abs() <= self.rules.momentum_slope_max_pct,
                format!("approach slope {slope_pct:.2}%/bar"),
            )
        } else {
            (true, "short history, slope not assessed".to_string())
        };
        checks.push(EntryCheck {
            name: "momentum_slope",
            priority: CheckPriority::Medium,
            passed,
            message,
        });
    }

    fn check_density_avoidance(
        &self,
        checks: &mut Vec<EntryCheck>,
        signal: &Signal,
        ctx: &EntryContext,
    ) {
        if !self.rules.density_avoidance_enabled {
            return;
        }
        let keep_away = signal.entry * self.rules.density_avoidance_bps / 10_000.0;
        let blocking = ctx.opposing_density_zones.iter().find(|(low, high)| {
            let ahead = match signal.side {
                // A wall just above a long entry absorbs the move.
                Side::Long => *low >= signal.entry - keep_away,
                Side::Short => *high <= signal.entry + keep_away,
            };
            let near = (signal.entry - *low).abs() <= keep_away
                || (signal.entry - *high).abs() <= keep_away
                || (signal.entry >= *low && signal.entry <= *high);
            ahead && near
        });
        checks.push(EntryCheck {
            name: "density_avoidance",
            priority: CheckPriority::Critical,
            passed: blocking.is_none(),
            message: match blocking {
                Some((low, high)) => {
                    format!("opposing density at {low:.6}-{high:.6} near entry")
                }
                None => "no opposing density at entry".to_string(),
            },
        });
    }

    fn check_clean_breakout(
        &self,
        checks: &mut Vec<EntryCheck>,
        signal: &Signal,
        ctx: &EntryContext,
    ) {
        let Some(last) = ctx.candles.last() else {
            checks.push(EntryCheck {
                name: "clean_breakout",
                priority: CheckPriority::High,
                passed: false,
                message: "no candles".to_string(),
            });
            return;
        };
        let distance_bps = if signal.level > 0.0 {
            (last.close - signal.level).abs() / signal.level * 10_000.0
        } else {
            0.0
        };
        let distance_ok = distance_bps >= self.rules.clean_breakout_min_bps;
        let fresh = ctx.bars_since_breakout <= self.rules.max_bars_since_breakout;
        checks.push(EntryCheck {
            name: "clean_breakout",
            priority: CheckPriority::High,
            passed: distance_ok && fresh,
            message: format!(
                "{distance_bps:.1} bps past level, {} bars since breakout",
                ctx.bars_since_breakout
            ),
        });
    }

    fn check_market_quality(&self, checks: &mut Vec<EntryCheck>, ctx: &EntryContext) {
        let candles = &ctx.candles;
        if candles.len() < self.quality.consolidation_bars as usize {
            checks.push(EntryCheck {
                name: "market_quality",
                priority: CheckPriority::Medium,
                passed: false,
                message: "insufficient history for quality assessment".to_string(),
            });
            return;
        }
        let window = &candles[candles.len() - self.quality.consolidation_bars as usize..];

        // Flat market: the window's total range is too small to trade.
        if self.quality.flat_market_filter_enabled {
            let high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            let mid = (high + low) / 2.0;
            let range_pct = if mid > 0.0 { (high - low) / mid * 100.0 } else { 0.0 };
            if range_pct < self.quality.flat_min_range_pct {
                checks.push(EntryCheck {
                    name: "market_quality",
                    priority: CheckPriority::Medium,
                    passed: false,
                    message: format!("flat market, range {range_pct:.2}%"),
                });
                return;
            }
        }

        // Noise: the tape flips direction nearly every bar.
        if self.quality.noise_filter_enabled && window.len() >= 3 {
            let mut flips = 0usize;
            let mut moves = 0usize;
            for pair in window.windows(2) {
                let a = pair[0].close - pair[0].open;
                let b = pair[1].close - pair[1].open;
                if a != 0.0 && b != 0.0 {
                    moves += 1;
                    if (a > 0.0) != (b > 0.0) {
                        flips += 1;
                    }
                }
            }
            let flip_fraction = if moves > 0 {
                flips as f64 / moves as f64
            } else {
                0.0
            };
            if flip_fraction > self.quality.noise_threshold {
                checks.push(EntryCheck {
                    name: "market_quality",
                    priority: CheckPriority::Medium,
                    passed: false,
                    message: format!("noisy tape, flip fraction {flip_fraction:.2}"),
                });
                return;
            }
        }

        checks.push(EntryCheck {
            name: "market_quality",
            priority: CheckPriority::Medium,
            passed: true,
            message: "market quality acceptable".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::{Strategy, Symbol};
    use std::collections::BTreeMap;

    fn signal() -> Signal {
        Signal {
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            strategy: Strategy::Momentum,
            reason: "test".into(),
            entry: 100.1,
            level: 100.0,
            sl: 99.0,
            tp1: None,
            tp2: None,
            confidence: 0.85,
            ts_ms: 0,
            meta: BTreeMap::new(),
        }
    }

    /// Trending bars with a volume-confirmed trigger bar.
    fn good_context() -> EntryContext {
        let mut candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 99.0 + i as f64 * 0.02;
                Candle::new(i as i64 * 300_000, base, base + 0.30, base - 0.05, base + 0.25, 1_000.0)
            })
            .collect();
        candles.push(Candle::new(
            30 * 300_000,
            99.6,
            100.25,
            99.55,
            100.15,
            3_000.0,
        ));
        EntryContext {
            candles,
            opposing_density_zones: vec![],
            bars_since_breakout: 1,
        }
    }

    fn validator() -> EntryValidator {
        EntryValidator::new(EntryRulesConfig::default(), MarketQualityConfig::default())
    }

    #[test]
    fn test_clean_entry_validates() {
        let result = validator().validate(&signal(), &good_context());
        assert!(result.valid, "checks: {:?}", result.checks);
        assert_eq!(result.confidence_penalty, 0.0);
    }

    #[test]
    fn test_opposing_density_is_critical() {
        let mut ctx = good_context();
        ctx.opposing_density_zones = vec![(100.12, 100.20)];
        let result = validator().validate(&signal(), &ctx);
        assert!(!result.valid);
        let density = result
            .checks
            .iter()
            .find(|c| c.name == "density_avoidance")
            .unwrap();
        assert!(!density.passed);
        assert_eq!(density.priority, CheckPriority::Critical);
    }

    #[test]
    fn test_weak_volume_penalises_but_allows() {
        let mut ctx = good_context();
        ctx.candles.last_mut().unwrap().volume = 1_000.0;
        let result = validator().validate(&signal(), &ctx);
        assert!(result.valid);
        assert!(result.confidence_penalty > 0.0);
        let vol = result
            .checks
            .iter()
            .find(|c| c.name == "volume_confirmation")
            .unwrap();
        assert!(!vol.passed);
    }

    #[test]
    fn test_stale_breakout_fails_clean_check() {
        let mut ctx = good_context();
        ctx.bars_since_breakout = 10;
        let result = validator().validate(&signal(), &ctx);
        let clean = result
            .checks
            .iter()
            .find(|c| c.name == "clean_breakout")
            .unwrap();
        assert!(!clean.passed);
        // High priority failures warn without invalidating.
        assert!(result.valid);
    }
}
