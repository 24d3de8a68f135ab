//! Rule-driven early exit checks.
//!
//! Five independently togglable rules: failed breakout, activity drop,
//! weak impulse, max hold time and time stop. Every rule yields a signal
//! with urgency and confidence; the highest-priority signal (urgency
//! first, then confidence) is the one acted on.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ExitRulesConfig;

/// Exit urgency, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    Immediate,
}

/// One triggered exit rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleExitSignal {
    pub rule_name: &'static str,
    pub reason: String,
    pub urgency: Urgency,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Market state snapshot for exit evaluation.
#[derive(Debug, Clone)]
pub struct ExitMarketState {
    pub current_price: f64,
    pub current_volume: f64,
    /// Price change rate of recent bars.
    pub current_momentum: f64,
    pub bars_since_entry: u32,
    pub entry_price: f64,
    /// The level whose breakout opened the position.
    pub breakout_level: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub entry_time: DateTime<Utc>,
    pub is_long: bool,
    pub avg_volume_before_entry: Option<f64>,
    pub avg_momentum_before_entry: Option<f64>,
}

/// Evaluates the configured exit rules.
pub struct ExitRulesChecker {
    config: ExitRulesConfig,
}

impl ExitRulesChecker {
    pub fn new(config: ExitRulesConfig) -> Self {
        let mut enabled = Vec::new();
        if config.failed_breakout_enabled {
            enabled.push("failed_breakout");
        }
        if config.activity_drop_enabled {
            enabled.push("activity_drop");
        }
        if config.weak_impulse_enabled {
            enabled.push("weak_impulse");
        }
        if config.max_hold_time_hours.is_some() {
            enabled.push("max_hold_time");
        }
        if config.time_stop_minutes.is_some() {
            enabled.push("time_stop");
        }
        info!(rules = ?enabled, "Exit rules checker initialized");
        Self { config }
    }

    /// Run every enabled rule. Empty when nothing triggered.
    pub fn check_all(&self, state: &ExitMarketState, now: DateTime<Utc>) -> Vec<RuleExitSignal> {
        let mut signals = Vec::new();

        if self.config.failed_breakout_enabled {
            if let Some(signal) = self.check_failed_breakout(state) {
                signals.push(signal);
            }
        }
        if self.config.activity_drop_enabled {
            if let Some(signal) = self.check_activity_drop(state) {
                signals.push(signal);
            }
        }
        if self.config.weak_impulse_enabled {
            if let Some(signal) = self.check_weak_impulse(state) {
                signals.push(signal);
            }
        }
        if self.config.max_hold_time_hours.is_some() {
            if let Some(signal) = self.check_max_hold_time(state, now) {
                signals.push(signal);
            }
        }
        if self.config.time_stop_minutes.is_some() {
            if let Some(signal) = self.check_time_stop(state, now) {
                signals.push(signal);
            }
        }

        if !signals.is_empty() {
            debug!(
                rules = ?signals.iter().map(|s| s.rule_name).collect::<Vec<_>>(),
                "Exit rules triggered"
            );
        }
        signals
    }

    /// Highest priority: urgency first, then confidence.
    pub fn highest_priority(signals: Vec<RuleExitSignal>) -> Option<RuleExitSignal> {
        signals.into_iter().max_by(|a, b| {
            (a.urgency, a.confidence)
                .partial_cmp(&(b.urgency, b.confidence))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Convenience: run all rules and return the winner.
    pub fn should_exit(
        &self,
        state: &ExitMarketState,
        now: DateTime<Utc>,
    ) -> Option<RuleExitSignal> {
        Self::highest_priority(self.check_all(state, now))
    }

    /// Price re-crossed the breakout level after the grace bars.
    fn check_failed_breakout(&self, state: &ExitMarketState) -> Option<RuleExitSignal> {
        if state.bars_since_entry < self.config.failed_breakout_bars {
            return None;
        }

        let failed = if state.is_long {
            state.current_price <= state.breakout_level
        } else {
            state.current_price >= state.breakout_level
        };
        if !failed {
            return None;
        }

        let direction = if state.is_long { "below" } else { "above" };
        Some(RuleExitSignal {
            rule_name: "failed_breakout",
            reason: format!(
                "price {:.6} back {direction} breakout level {:.6}",
                state.current_price, state.breakout_level
            ),
            urgency: Urgency::Immediate,
            confidence: 0.9,
        })
    }

    /// Volume or momentum collapsed relative to the pre-entry average.
    fn check_activity_drop(&self, state: &ExitMarketState) -> Option<RuleExitSignal> {
        // Both baselines are required; a zero baseline means no signal,
        // never a division.
        let avg_volume = state.avg_volume_before_entry?;
        let avg_momentum = state.avg_momentum_before_entry?;
        if avg_volume <= 0.0 || avg_momentum <= 0.0 {
            return None;
        }
        if state.bars_since_entry < self.config.activity_drop_window_bars {
            return None;
        }

        let volume_ratio = state.current_volume / avg_volume;
        let momentum_ratio = state.current_momentum / avg_momentum;
        let threshold = self.config.activity_drop_threshold;

        if volume_ratio >= threshold && momentum_ratio >= threshold {
            return None;
        }

        let min_ratio = volume_ratio.min(momentum_ratio);
        let confidence = (0.5 + 0.5 * (1.0 - min_ratio / threshold)).min(0.95);

        Some(RuleExitSignal {
            rule_name: "activity_drop",
            reason: format!(
                "volume ratio {volume_ratio:.2}, momentum ratio {momentum_ratio:.2}, threshold {threshold:.2}"
            ),
            urgency: Urgency::Normal,
            confidence,
        })
    }

    /// Favourable excursion too small after the check window.
    fn check_weak_impulse(&self, state: &ExitMarketState) -> Option<RuleExitSignal> {
        if state.bars_since_entry < self.config.weak_impulse_check_bars {
            return None;
        }
        if state.entry_price <= 0.0 {
            return None;
        }

        let move_distance = if state.is_long {
            state.highest_price - state.entry_price
        } else {
            state.entry_price - state.lowest_price
        };
        let move_pct = move_distance / state.entry_price * 100.0;
        let min_move = self.config.weak_impulse_min_move_pct;

        if move_pct >= min_move {
            return None;
        }

        let confidence = (0.6 + 0.3 * (1.0 - (move_pct / min_move).max(0.0))).min(0.9);
        Some(RuleExitSignal {
            rule_name: "weak_impulse",
            reason: format!(
                "only {move_pct:.2}% favourable move after {} bars, need {min_move:.2}%",
                state.bars_since_entry
            ),
            urgency: Urgency::Normal,
            confidence,
        })
    }

    /// Held longer than the hard limit.
    fn check_max_hold_time(
        &self,
        state: &ExitMarketState,
        now: DateTime<Utc>,
    ) -> Option<RuleExitSignal> {
        let max_hours = self.config.max_hold_time_hours?;
        let held = now - state.entry_time;
        let held_hours = held.num_milliseconds() as f64 / 3_600_000.0;
        if held_hours < max_hours {
            return None;
        }
        Some(RuleExitSignal {
            rule_name: "max_hold_time",
            reason: format!("held {held_hours:.1} h, limit {max_hours:.1} h"),
            urgency: Urgency::Normal,
            confidence: 1.0,
        })
    }

    /// Not profitable after the time-stop window.
    fn check_time_stop(
        &self,
        state: &ExitMarketState,
        now: DateTime<Utc>,
    ) -> Option<RuleExitSignal> {
        let minutes = self.config.time_stop_minutes?;
        let held = now - state.entry_time;
        if held < Duration::milliseconds((minutes * 60_000.0) as i64) {
            return None;
        }

        let profitable = if state.is_long {
            state.current_price > state.entry_price
        } else {
            state.current_price < state.entry_price
        };
        if profitable {
            return None;
        }

        Some(RuleExitSignal {
            rule_name: "time_stop",
            reason: format!(
                "not profitable after {:.1} min, limit {minutes:.1} min",
                held.num_milliseconds() as f64 / 60_000.0
            ),
            urgency: Urgency::Low,
            confidence: 0.7,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExitMarketState {
        ExitMarketState {
            current_price: 101.0,
            current_volume: 1_000.0,
            current_momentum: 0.5,
            bars_since_entry: 5,
            entry_price: 100.0,
            breakout_level: 98.0,
            highest_price: 101.5,
            lowest_price: 99.8,
            entry_time: Utc::now(),
            is_long: true,
            avg_volume_before_entry: Some(1_000.0),
            avg_momentum_before_entry: Some(0.5),
        }
    }

    fn checker() -> ExitRulesChecker {
        ExitRulesChecker::new(ExitRulesConfig::default())
    }

    #[test]
    fn test_failed_breakout_fires_immediate() {
        let mut s = state();
        s.current_price = 97.0;
        s.bars_since_entry = 4;

        let signal = checker().should_exit(&s, Utc::now()).unwrap();
        assert_eq!(signal.rule_name, "failed_breakout");
        assert_eq!(signal.urgency, Urgency::Immediate);
    }

    #[test]
    fn test_failed_breakout_waits_for_bars() {
        let mut s = state();
        s.current_price = 97.0;
        s.bars_since_entry = 1;
        let signals = checker().check_all(&s, Utc::now());
        assert!(!signals.iter().any(|x| x.rule_name == "failed_breakout"));
    }

    #[test]
    fn test_activity_drop_confidence_scales() {
        let mut s = state();
        s.current_volume = 100.0; // ratio 0.1 against threshold 0.4
        s.highest_price = 102.0; // keep weak impulse quiet
        let signals = checker().check_all(&s, Utc::now());
        let drop = signals
            .iter()
            .find(|x| x.rule_name == "activity_drop")
            .unwrap();
        assert_eq!(drop.urgency, Urgency::Normal);
        // min_ratio 0.2 of threshold: confidence 0.5 + 0.5*0.75 = 0.875.
        assert!((drop.confidence - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_zero_baselines_never_divide() {
        let mut s = state();
        s.avg_volume_before_entry = Some(0.0);
        let signals = checker().check_all(&s, Utc::now());
        assert!(!signals.iter().any(|x| x.rule_name == "activity_drop"));

        s.avg_volume_before_entry = None;
        let signals = checker().check_all(&s, Utc::now());
        assert!(!signals.iter().any(|x| x.rule_name == "activity_drop"));
    }

    #[test]
    fn test_weak_impulse_after_window() {
        let mut s = state();
        s.bars_since_entry = 8;
        s.highest_price = 100.1; // 0.1% move, below the 0.3% minimum
        let signals = checker().check_all(&s, Utc::now());
        let weak = signals
            .iter()
            .find(|x| x.rule_name == "weak_impulse")
            .unwrap();
        assert!(weak.confidence > 0.6 && weak.confidence <= 0.9);
    }

    #[test]
    fn test_max_hold_time_certain() {
        let mut s = state();
        s.entry_time = Utc::now() - Duration::hours(30);
        s.highest_price = 103.0;
        let signals = checker().check_all(&s, Utc::now());
        let hold = signals
            .iter()
            .find(|x| x.rule_name == "max_hold_time")
            .unwrap();
        assert_eq!(hold.confidence, 1.0);
    }

    #[test]
    fn test_time_stop_only_when_unprofitable() {
        let mut s = state();
        s.entry_time = Utc::now() - Duration::hours(3);
        s.highest_price = 103.0;

        // Profitable: no time stop.
        s.current_price = 101.0;
        let signals = checker().check_all(&s, Utc::now());
        assert!(!signals.iter().any(|x| x.rule_name == "time_stop"));

        // Under water: fires at low urgency.
        s.current_price = 99.5;
        let signals = checker().check_all(&s, Utc::now());
        let ts = signals.iter().find(|x| x.rule_name == "time_stop").unwrap();
        assert_eq!(ts.urgency, Urgency::Low);
    }

    #[test]
    fn test_priority_order_immediate_wins() {
        let signals = vec![
            RuleExitSignal {
                rule_name: "time_stop",
                reason: String::new(),
                urgency: Urgency::Low,
                confidence: 0.7,
            },
            RuleExitSignal {
                rule_name: "max_hold_time",
                reason: String::new(),
                urgency: Urgency::Normal,
                confidence: 1.0,
            },
            RuleExitSignal {
                rule_name: "failed_breakout",
                reason: String::new(),
                urgency: Urgency::Immediate,
                confidence: 0.9,
            },
        ];
        let winner = ExitRulesChecker::highest_priority(signals).unwrap();
        assert_eq!(winner.rule_name, "failed_breakout");
    }
}
