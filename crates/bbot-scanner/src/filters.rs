//! Scanner filter groups.
//!
//! Three groups run in order: liquidity, volatility, correlation. Every
//! predicate is always evaluated so diagnostics show the full picture;
//! the row's pass flag is the conjunction of all outcomes. Filters whose
//! input is missing (no L2 depth, no open interest) are recorded as
//! skipped and pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use bbot_core::{FilterOutcome, MarketData};

use crate::metrics::ScanMetrics;

/// Liquidity thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityFilters {
    pub min_24h_volume_usd: f64,
    pub min_oi_usd: f64,
    pub max_spread_bps: f64,
    pub min_depth_usd_0_5pct: f64,
    pub min_depth_usd_0_3pct: f64,
    pub min_trades_per_minute: f64,
}

impl Default for LiquidityFilters {
    fn default() -> Self {
        Self {
            min_24h_volume_usd: 10_000_000.0,
            min_oi_usd: 0.0,
            max_spread_bps: 10.0,
            min_depth_usd_0_5pct: 50_000.0,
            min_depth_usd_0_3pct: 25_000.0,
            min_trades_per_minute: 5.0,
        }
    }
}

/// Volatility thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityFilters {
    /// ATR(15m)/price acceptance band.
    pub atr_range_min: f64,
    pub atr_range_max: f64,
    pub bb_width_percentile_max: f64,
    pub volume_surge_1h_min: f64,
    pub volume_surge_5m_min: f64,
    /// Minimum |24h OI change| when open interest is reported.
    pub oi_delta_threshold: f64,
}

impl Default for VolatilityFilters {
    fn default() -> Self {
        Self {
            atr_range_min: 0.005,
            atr_range_max: 0.05,
            bb_width_percentile_max: 80.0,
            volume_surge_1h_min: 1.2,
            volume_surge_5m_min: 1.5,
            oi_delta_threshold: 0.0,
        }
    }
}

const NO_L2_REASON: &str = "no L2 depth data";

/// Apply the liquidity group.
pub fn apply_liquidity_filters(
    filters: &LiquidityFilters,
    market: &MarketData,
) -> BTreeMap<String, FilterOutcome> {
    let mut results = BTreeMap::new();

    let volume = market.volume_24h_usd;
    results.insert(
        "min_24h_volume".to_string(),
        outcome(
            volume >= filters.min_24h_volume_usd,
            volume,
            filters.min_24h_volume_usd,
            format!("24h volume ${volume:.0}"),
        ),
    );

    match &market.l2_depth {
        Some(depth) => {
            results.insert(
                "max_spread".to_string(),
                outcome(
                    depth.spread_bps <= filters.max_spread_bps,
                    depth.spread_bps,
                    filters.max_spread_bps,
                    format!("spread {:.1} bps", depth.spread_bps),
                ),
            );
            let total_0_5 = depth.total_depth_0_5pct();
            results.insert(
                "min_depth_0_5pct".to_string(),
                outcome(
                    total_0_5 >= filters.min_depth_usd_0_5pct,
                    total_0_5,
                    filters.min_depth_usd_0_5pct,
                    format!("depth 0.5% ${total_0_5:.0}"),
                ),
            );
            let total_0_3 = depth.total_depth_0_3pct();
            results.insert(
                "min_depth_0_3pct".to_string(),
                outcome(
                    total_0_3 >= filters.min_depth_usd_0_3pct,
                    total_0_3,
                    filters.min_depth_usd_0_3pct,
                    format!("depth 0.3% ${total_0_3:.0}"),
                ),
            );
        }
        None => {
            results.insert(
                "max_spread".to_string(),
                FilterOutcome::skipped(filters.max_spread_bps, NO_L2_REASON),
            );
            results.insert(
                "min_depth_0_5pct".to_string(),
                FilterOutcome::skipped(filters.min_depth_usd_0_5pct, NO_L2_REASON),
            );
            results.insert(
                "min_depth_0_3pct".to_string(),
                FilterOutcome::skipped(filters.min_depth_usd_0_3pct, NO_L2_REASON),
            );
        }
    }

    let tpm = market.trades_per_minute;
    results.insert(
        "min_trades_per_minute".to_string(),
        outcome(
            tpm >= filters.min_trades_per_minute,
            tpm,
            filters.min_trades_per_minute,
            format!("trades/min {tpm:.1}"),
        ),
    );

    if filters.min_oi_usd > 0.0 {
        match market.oi_usd {
            Some(oi) => {
                results.insert(
                    "min_oi".to_string(),
                    outcome(
                        oi >= filters.min_oi_usd,
                        oi,
                        filters.min_oi_usd,
                        format!("OI ${oi:.0}"),
                    ),
                );
            }
            None => {
                results.insert(
                    "min_oi".to_string(),
                    FilterOutcome::skipped(filters.min_oi_usd, "no open interest data"),
                );
            }
        }
    }

    results
}

/// Apply the volatility group.
pub fn apply_volatility_filters(
    filters: &VolatilityFilters,
    market: &MarketData,
    metrics: &ScanMetrics,
) -> BTreeMap<String, FilterOutcome> {
    let mut results = BTreeMap::new();

    let atr_ratio = market.atr_ratio();
    results.insert(
        "atr_range".to_string(),
        FilterOutcome {
            passed: (filters.atr_range_min..=filters.atr_range_max).contains(&atr_ratio),
            value: Some(atr_ratio),
            threshold: filters.atr_range_max,
            reason: format!(
                "ATR ratio {atr_ratio:.4}, band {:.4}-{:.4}",
                filters.atr_range_min, filters.atr_range_max
            ),
        },
    );

    results.insert(
        "bb_width".to_string(),
        outcome(
            market.bb_width_pct <= filters.bb_width_percentile_max,
            market.bb_width_pct,
            filters.bb_width_percentile_max,
            format!("BB width {:.1}%", market.bb_width_pct),
        ),
    );

    results.insert(
        "volume_surge_1h".to_string(),
        outcome(
            metrics.vol_surge_1h >= filters.volume_surge_1h_min,
            metrics.vol_surge_1h,
            filters.volume_surge_1h_min,
            format!("vol surge 1h {:.2}x", metrics.vol_surge_1h),
        ),
    );

    results.insert(
        "volume_surge_5m".to_string(),
        outcome(
            metrics.vol_surge_5m >= filters.volume_surge_5m_min,
            metrics.vol_surge_5m,
            filters.volume_surge_5m_min,
            format!("vol surge 5m {:.2}x", metrics.vol_surge_5m),
        ),
    );

    if filters.oi_delta_threshold > 0.0 {
        match market.oi_change_24h {
            Some(delta) => {
                results.insert(
                    "oi_delta".to_string(),
                    outcome(
                        delta.abs() >= filters.oi_delta_threshold,
                        delta.abs(),
                        filters.oi_delta_threshold,
                        format!("|OI delta 24h| {:.3}", delta.abs()),
                    ),
                );
            }
            None => {
                results.insert(
                    "oi_delta".to_string(),
                    FilterOutcome::skipped(filters.oi_delta_threshold, "no open interest data"),
                );
            }
        }
    }

    results
}

/// Apply the correlation group.
pub fn apply_correlation_filter(
    correlation_limit: f64,
    market: &MarketData,
) -> BTreeMap<String, FilterOutcome> {
    let mut results = BTreeMap::new();
    let abs_corr = market.btc_correlation.abs();
    results.insert(
        "correlation".to_string(),
        outcome(
            abs_corr <= correlation_limit,
            abs_corr,
            correlation_limit,
            format!("BTC correlation {:.2}", market.btc_correlation),
        ),
    );
    results
}

fn outcome(passed: bool, value: f64, threshold: f64, reason: String) -> FilterOutcome {
    if passed {
        FilterOutcome::pass(value, threshold, reason)
    } else {
        FilterOutcome::fail(value, threshold, reason)
    }
}
