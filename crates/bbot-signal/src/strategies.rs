//! Momentum and retest strategy evaluators.
//!
//! Each strategy evaluates its full predicate set through the validator
//! (no short-circuit, so diagnostics always show every check) and builds
//! a signal only when everything passed.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use bbot_core::{indicators, Candle, LevelKind, ScanResult, Side, Signal, Strategy, TradingLevel};
use bbot_diag::DiagSink;

use crate::config::SignalConfig;
use crate::history::BreakoutHistory;
use crate::validator::{confidence, Cmp, Validator};

/// Window for retest-qualifying prior breakouts.
const RETEST_WINDOW_MS: i64 = 24 * 3600 * 1000;

/// ATR period shared by both strategies.
const ATR_PERIOD: usize = 14;

/// Feature inputs that are not part of the scan result.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolFeatures {
    /// Book imbalance in [-1, 1], positive when bids dominate.
    pub l2_imbalance: f64,
    /// Current activity index.
    pub activity_index: f64,
}

/// Evaluate the momentum breakout strategy.
pub fn evaluate_momentum(
    config: &SignalConfig,
    scan: &ScanResult,
    features: SymbolFeatures,
    diag: &DiagSink,
) -> Option<Signal> {
    let candles = &scan.market_data.candles_5m;
    let last = candles.last()?;
    let mut validator = Validator::new(scan.symbol.clone(), "momentum", diag.clone());

    let atr = indicators::atr(candles, ATR_PERIOD);

    // The breakout level: strongest level whose break direction the
    // last close confirms.
    let broken = pick_broken_level(&scan.levels, last.close, config.momentum_epsilon);

    match &broken {
        Some((level, side)) => {
            let frac = breakout_fraction(last.close, level.price, *side);
            validator.check("price_breakout", frac, config.momentum_epsilon, Cmp::Gte);
        }
        None => {
            // Nearest level for the diagnostics row, if any.
            let frac = scan
                .levels
                .iter()
                .map(|l| breakout_fraction(last.close, l.price, long_or_short(l)))
                .fold(f64::NEG_INFINITY, f64::max);
            validator.check(
                "price_breakout",
                if frac.is_finite() { frac } else { 0.0 },
                config.momentum_epsilon,
                Cmp::Gte,
            );
        }
    }

    match volume_surge(candles) {
        Some(surge) => {
            validator.check(
                "volume_surge",
                surge,
                config.momentum_volume_multiplier,
                Cmp::Gte,
            );
        }
        None => validator.fail("volume_surge", "insufficient candle history"),
    }

    validator.check(
        "body_ratio",
        last.body_ratio(),
        config.momentum_body_ratio_min,
        Cmp::Gte,
    );

    let side = broken.as_ref().map(|(_, s)| *s).unwrap_or(Side::Long);
    validator.check(
        "l2_imbalance",
        features.l2_imbalance * side.sign(),
        config.l2_imbalance_threshold,
        Cmp::Gte,
    );

    match (atr, indicators::vwap(candles)) {
        (Some(atr), Some(vwap)) if atr > 0.0 => {
            validator.check(
                "vwap_gap",
                (last.close - vwap).abs() / atr,
                config.vwap_gap_max_atr,
                Cmp::Lte,
            );
        }
        _ => validator.fail("vwap_gap", "no ATR or VWAP"),
    }

    if !validator.all_passed() {
        return None;
    }
    let (level, side) = broken?;
    let atr = atr?;

    let entry = level.price * (1.0 + config.momentum_epsilon * side.sign());
    let sl = protective_stop(candles, side, atr, config);
    let r = (entry - sl).abs();

    let signal = Signal {
        symbol: scan.symbol.clone(),
        side,
        strategy: Strategy::Momentum,
        reason: format!(
            "momentum breakout of {} {:.6}",
            level.kind, level.price
        ),
        entry,
        level: level.price,
        sl,
        tp1: Some(entry + 2.0 * r * side.sign()),
        tp2: Some(entry + 3.5 * r * side.sign()),
        confidence: confidence(validator.mean_margin(), scan.score),
        ts_ms: Utc::now().timestamp_millis(),
        meta: signal_meta(level, atr, features),
    };

    if !signal.is_consistent() {
        debug!(symbol = %scan.symbol, "Momentum signal dropped: inconsistent stop");
        return None;
    }
    Some(signal)
}

/// Evaluate the retest strategy.
pub fn evaluate_retest(
    config: &SignalConfig,
    scan: &ScanResult,
    features: SymbolFeatures,
    history: &BreakoutHistory,
    diag: &DiagSink,
) -> Option<Signal> {
    let candles = &scan.market_data.candles_5m;
    let last = candles.last()?;
    let now_ms = Utc::now().timestamp_millis();
    let mut validator = Validator::new(scan.symbol.clone(), "retest", diag.clone());

    // A prior breakout whose level the price has come back to.
    let candidate = history
        .records(&scan.symbol)
        .into_iter()
        .rev()
        .filter(|r| now_ms - r.ts_ms <= RETEST_WINDOW_MS)
        .find(|r| {
            last.close > 0.0
                && (last.close - r.level_price).abs() / last.close
                    <= config.retest_proximity_frac
        });

    match &candidate {
        Some(rec) => {
            let proximity = (last.close - rec.level_price).abs() / last.close;
            validator.check(
                "level_retest",
                proximity,
                config.retest_proximity_frac,
                Cmp::Lte,
            );
            let age_hours = (now_ms - rec.ts_ms) as f64 / 3_600_000.0;
            validator.check("previous_breakout", age_hours, 24.0, Cmp::Lte);
        }
        None => {
            validator.fail("level_retest", "no prior breakout level nearby");
            validator.fail("previous_breakout", "no matching breakout in window");
        }
    }

    let atr = indicators::atr(candles, ATR_PERIOD);
    if let (Some(rec), Some(atr)) = (&candidate, atr) {
        if atr > 0.0 {
            let pierce = max_pierce(candles, rec.ts_ms, rec.level_price, rec.side);
            validator.check(
                "pierce_atr",
                pierce / atr,
                config.retest_max_pierce_atr,
                Cmp::Lte,
            );
            validator.check(
                "pierce_frac",
                pierce / rec.level_price,
                config.retest_pierce_tolerance,
                Cmp::Lte,
            );
        } else {
            validator.fail("pierce_atr", "zero ATR");
        }
    } else if candidate.is_some() {
        validator.fail("pierce_atr", "no ATR");
    }

    let side = candidate.as_ref().map(|r| r.side).unwrap_or(Side::Long);
    validator.check(
        "l2_imbalance",
        features.l2_imbalance * side.sign(),
        config.l2_imbalance_threshold,
        Cmp::Gte,
    );
    validator.check(
        "trading_activity",
        features.activity_index,
        config.min_activity_index,
        Cmp::Gte,
    );

    if !validator.all_passed() {
        return None;
    }
    let rec = candidate?;
    let atr = atr?;

    let entry = last.close;
    let sl = rec.level_price - config.sl_atr_buffer * atr * rec.side.sign();
    let r = (entry - sl).abs();

    let signal = Signal {
        symbol: scan.symbol.clone(),
        side: rec.side,
        strategy: Strategy::Retest,
        reason: format!("retest of broken level {:.6}", rec.level_price),
        entry,
        level: rec.level_price,
        sl,
        tp1: Some(entry + 2.0 * r * rec.side.sign()),
        tp2: Some(entry + 3.5 * r * rec.side.sign()),
        confidence: confidence(validator.mean_margin(), scan.score),
        ts_ms: now_ms,
        meta: {
            let mut meta = BTreeMap::new();
            meta.insert("atr".to_string(), atr);
            meta.insert("imbalance".to_string(), features.l2_imbalance);
            meta.insert("activity_index".to_string(), features.activity_index);
            meta
        },
    };

    if !signal.is_consistent() {
        debug!(symbol = %scan.symbol, "Retest signal dropped: inconsistent stop");
        return None;
    }
    Some(signal)
}

/// The side a break of this level would open.
fn long_or_short(level: &TradingLevel) -> Side {
    match level.kind {
        LevelKind::Resistance => Side::Long,
        LevelKind::Support => Side::Short,
    }
}

/// Signed break fraction of close beyond the level.
fn breakout_fraction(close: f64, level_price: f64, side: Side) -> f64 {
    if level_price <= 0.0 {
        return 0.0;
    }
    (close - level_price) / level_price * side.sign()
}

/// Strongest level whose break the close confirms by at least epsilon.
fn pick_broken_level(
    levels: &[TradingLevel],
    close: f64,
    epsilon: f64,
) -> Option<(TradingLevel, Side)> {
    let mut sorted: Vec<&TradingLevel> = levels.iter().collect();
    sorted.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.into_iter().find_map(|level| {
        let side = long_or_short(level);
        (breakout_fraction(close, level.price, side) >= epsilon)
            .then(|| (level.clone(), side))
    })
}

/// Last volume over the mean of the prior 20 bars.
fn volume_surge(candles: &[Candle]) -> Option<f64> {
    if candles.len() < 21 {
        return None;
    }
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let prior = &volumes[volumes.len() - 21..volumes.len() - 1];
    let mean = indicators::mean(prior);
    (mean > 0.0).then(|| volumes[volumes.len() - 1] / mean)
}

/// ATR-buffered stop beyond the recent swing extreme.
fn protective_stop(candles: &[Candle], side: Side, atr: f64, config: &SignalConfig) -> f64 {
    let lookback = candles.len().saturating_sub(config.swing_lookback_bars);
    let window = &candles[lookback..];
    match side {
        Side::Long => {
            let swing_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            swing_low - config.sl_atr_buffer * atr
        }
        Side::Short => {
            let swing_high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            swing_high + config.sl_atr_buffer * atr
        }
    }
}

/// Worst excursion back through the level since the breakout.
fn max_pierce(candles: &[Candle], since_ts_ms: i64, level_price: f64, side: Side) -> f64 {
    let since: Vec<&Candle> = candles.iter().filter(|c| c.ts_ms >= since_ts_ms).collect();
    match side {
        Side::Long => {
            let min_low = since.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            (level_price - min_low).max(0.0)
        }
        Side::Short => {
            let max_high = since
                .iter()
                .map(|c| c.high)
                .fold(f64::NEG_INFINITY, f64::max);
            (max_high - level_price).max(0.0)
        }
    }
}

fn signal_meta(
    level: TradingLevel,
    atr: f64,
    features: SymbolFeatures,
) -> BTreeMap<String, f64> {
    let mut meta = BTreeMap::new();
    meta.insert("level_strength".to_string(), level.strength);
    meta.insert("atr".to_string(), atr);
    meta.insert("imbalance".to_string(), features.l2_imbalance);
    meta.insert("activity_index".to_string(), features.activity_index);
    meta
}
