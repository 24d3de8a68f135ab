//! Take-profit ladder placement.
//!
//! Fixed placement is entry plus the R multiple. Smart placement nudges
//! the target inside a bounded band to sit in front of density zones and
//! recent S/R instead of behind them, optionally snapping toward a round
//! number. Adaptive placement widens smart targets when realised
//! volatility expanded after entry.

use serde::{Deserialize, Serialize};
use tracing::debug;

use bbot_core::{PlacementMode, Side};

use crate::config::{SmartPlacementConfig, TpLevelConfig};

/// A priced ladder rung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedTp {
    pub level_name: String,
    pub price: f64,
    pub size_pct: f64,
    pub reward_multiple: f64,
    pub placement_mode: PlacementMode,
    pub triggered: bool,
}

/// Obstacles the smart modes steer around.
#[derive(Debug, Clone, Default)]
pub struct PlacementContext {
    /// Price bands holding significant resting liquidity.
    pub density_zones: Vec<(f64, f64)>,
    /// Recent support/resistance prices.
    pub sr_levels: Vec<f64>,
    /// Realised volatility after entry over volatility at entry.
    /// 1.0 means unchanged.
    pub realized_vol_ratio: f64,
}

/// Price the whole ladder for a position.
pub fn place_ladder(
    entry: f64,
    sl: f64,
    side: Side,
    levels: &[TpLevelConfig],
    smart: &SmartPlacementConfig,
    ctx: &PlacementContext,
) -> Vec<PlacedTp> {
    let r = (entry - sl).abs();
    levels
        .iter()
        .map(|level| {
            let fixed = entry + r * level.reward_multiple * side.sign();
            let price = match level.placement_mode {
                PlacementMode::Fixed => fixed,
                PlacementMode::Smart => adjust_smart(fixed, side, smart, ctx),
                PlacementMode::Adaptive => {
                    let smart_price = adjust_smart(fixed, side, smart, ctx);
                    widen_adaptive(smart_price, r, side, ctx)
                }
            };
            PlacedTp {
                level_name: level.level_name.clone(),
                price,
                size_pct: level.size_pct,
                reward_multiple: level.reward_multiple,
                placement_mode: level.placement_mode,
                triggered: false,
            }
        })
        .collect()
}

/// Nudge a fixed target off obstacles, within the adjustment band.
fn adjust_smart(
    fixed: f64,
    side: Side,
    config: &SmartPlacementConfig,
    ctx: &PlacementContext,
) -> f64 {
    let max_adjust = fixed * config.max_adjustment_bps / 10_000.0;
    let mut price = fixed;

    // Density zones: take profit in front of the wall, not behind it.
    for (zone_low, zone_high) in &ctx.density_zones {
        let buffer = fixed * config.density_zone_buffer_bps / 10_000.0;
        let in_zone = price >= zone_low - buffer && price <= zone_high + buffer;
        if in_zone {
            let candidate = match side {
                Side::Long => zone_low - buffer,
                Side::Short => zone_high + buffer,
            };
            if (candidate - fixed).abs() <= max_adjust {
                debug!(fixed, candidate, "TP nudged off density zone");
                price = candidate;
            }
        }
    }

    // S/R levels: same idea with a point obstacle.
    for level in &ctx.sr_levels {
        let buffer = fixed * config.sr_level_buffer_bps / 10_000.0;
        if (price - level).abs() <= buffer {
            let candidate = match side {
                Side::Long => level - buffer,
                Side::Short => level + buffer,
            };
            if (candidate - fixed).abs() <= max_adjust {
                price = candidate;
            }
        }
    }

    // Optional snap toward the nearest round step, bounded like the rest.
    if config.snap_to_round_numbers {
        if let Some(snapped) = nearest_round(price, &config.round_steps) {
            if (snapped - fixed).abs() <= max_adjust {
                price = snapped;
            }
        }
    }

    price
}

/// Widen an adaptive target when volatility expanded after entry.
fn widen_adaptive(price: f64, r: f64, side: Side, ctx: &PlacementContext) -> f64 {
    let expansion = (ctx.realized_vol_ratio - 1.0).clamp(0.0, 1.0);
    if expansion <= 0.0 {
        return price;
    }
    price + 0.5 * expansion * r * side.sign()
}

fn nearest_round(price: f64, steps: &[f64]) -> Option<f64> {
    steps
        .iter()
        .filter(|s| **s > 0.0)
        .map(|s| (price / s).round() * s)
        .min_by(|a, b| {
            (a - price)
                .abs()
                .partial_cmp(&(b - price).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::PlacementMode;

    fn levels() -> Vec<TpLevelConfig> {
        vec![
            TpLevelConfig {
                level_name: "tp1".to_string(),
                reward_multiple: 1.0,
                size_pct: 0.4,
                placement_mode: PlacementMode::Smart,
            },
            TpLevelConfig {
                level_name: "tp2".to_string(),
                reward_multiple: 2.0,
                size_pct: 0.3,
                placement_mode: PlacementMode::Fixed,
            },
            TpLevelConfig {
                level_name: "tp3".to_string(),
                reward_multiple: 3.5,
                size_pct: 0.3,
                placement_mode: PlacementMode::Fixed,
            },
        ]
    }

    #[test]
    fn test_fixed_placement_is_entry_plus_r_multiple() {
        let placed = place_ladder(
            100.0,
            99.0,
            Side::Long,
            &levels(),
            &SmartPlacementConfig::default(),
            &PlacementContext::default(),
        );
        assert!((placed[1].price - 102.0).abs() < 1e-9);
        assert!((placed[2].price - 103.5).abs() < 1e-9);
    }

    #[test]
    fn test_smart_placement_ducks_under_density_zone() {
        // Entry 100, SL 99: fixed TP1 at 101.00 inside the 100.90-101.00
        // density zone. Smart placement pulls it below the zone with the
        // buffer, within the 20 bps band.
        let smart = SmartPlacementConfig {
            max_adjustment_bps: 20.0,
            density_zone_buffer_bps: 5.0,
            ..Default::default()
        };
        let ctx = PlacementContext {
            density_zones: vec![(100.90, 101.00)],
            ..Default::default()
        };
        let placed = place_ladder(100.0, 99.0, Side::Long, &levels(), &smart, &ctx);

        let tp1 = &placed[0];
        let buffer = 101.0 * 5.0 / 10_000.0;
        assert!(tp1.price <= 100.90 - buffer + 1e-9);
        // Never adjusted further than 20 bps from the fixed target.
        assert!((tp1.price - 101.0).abs() <= 101.0 * 20.0 / 10_000.0 + 1e-9);
    }

    #[test]
    fn test_smart_placement_respects_adjustment_cap() {
        // A zone so wide that escaping it would cost more than the cap:
        // the target stays at the fixed price.
        let smart = SmartPlacementConfig {
            max_adjustment_bps: 5.0,
            density_zone_buffer_bps: 5.0,
            ..Default::default()
        };
        let ctx = PlacementContext {
            density_zones: vec![(100.0, 101.00)],
            ..Default::default()
        };
        let placed = place_ladder(100.0, 99.0, Side::Long, &levels(), &smart, &ctx);
        assert!((placed[0].price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_widens_on_vol_expansion() {
        let mut lv = levels();
        lv[0].placement_mode = PlacementMode::Adaptive;
        let ctx = PlacementContext {
            realized_vol_ratio: 1.6,
            ..Default::default()
        };
        let placed = place_ladder(
            100.0,
            99.0,
            Side::Long,
            &lv,
            &SmartPlacementConfig::default(),
            &ctx,
        );
        // 0.5 * 0.6 expansion * 1R beyond the fixed 101.0.
        assert!((placed[0].price - 101.3).abs() < 1e-9);
    }

    #[test]
    fn test_short_ladder_mirrors() {
        let placed = place_ladder(
            100.0,
            101.0,
            Side::Short,
            &levels(),
            &SmartPlacementConfig::default(),
            &PlacementContext::default(),
        );
        assert!((placed[1].price - 98.0).abs() < 1e-9);
    }
}
