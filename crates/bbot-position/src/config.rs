//! Position lifecycle configuration blocks.

use serde::{Deserialize, Serialize};

use bbot_core::{validate_tp_ladder, CoreError, PlacementMode, TpLevel};

/// One configured take-profit rung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpLevelConfig {
    pub level_name: String,
    pub reward_multiple: f64,
    pub size_pct: f64,
    pub placement_mode: PlacementMode,
}

impl TpLevelConfig {
    pub fn to_tp_level(&self) -> TpLevel {
        TpLevel {
            reward_multiple: self.reward_multiple,
            size_pct: self.size_pct,
            placement_mode: self.placement_mode,
            triggered: false,
        }
    }
}

/// Smart placement bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartPlacementConfig {
    /// Maximum nudge away from the fixed target, in bps of the target.
    pub max_adjustment_bps: f64,
    /// Keep-away buffer around density zones.
    pub density_zone_buffer_bps: f64,
    /// Keep-away buffer around recent S/R levels.
    pub sr_level_buffer_bps: f64,
    pub snap_to_round_numbers: bool,
    /// Round steps considered for snapping.
    pub round_steps: Vec<f64>,
}

impl Default for SmartPlacementConfig {
    fn default() -> Self {
        Self {
            max_adjustment_bps: 20.0,
            density_zone_buffer_bps: 5.0,
            sr_level_buffer_bps: 5.0,
            snap_to_round_numbers: false,
            round_steps: vec![100.0, 10.0, 1.0, 0.1],
        }
    }
}

/// Position management configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    pub tp_levels: Vec<TpLevelConfig>,
    /// Favourable excursion in R that moves the stop to breakeven.
    pub breakeven_trigger_r: f64,
    /// Buffer over entry for the breakeven stop, in bps.
    #[serde(default = "default_breakeven_buffer_bps")]
    pub breakeven_buffer_bps: f64,
    /// Favourable excursion in R that activates the trailing stop.
    pub trailing_activation_r: f64,
    /// Trail distance from the favourable extreme, in bps.
    pub trailing_step_bps: f64,
    pub max_hold_time_hours: f64,
    pub tp_smart_placement: SmartPlacementConfig,
}

fn default_breakeven_buffer_bps() -> f64 {
    2.0
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            tp_levels: vec![
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
                    placement_mode: PlacementMode::Smart,
                },
                TpLevelConfig {
                    level_name: "tp3".to_string(),
                    reward_multiple: 3.5,
                    size_pct: 0.3,
                    placement_mode: PlacementMode::Fixed,
                },
            ],
            breakeven_trigger_r: 1.0,
            breakeven_buffer_bps: 2.0,
            trailing_activation_r: 2.0,
            trailing_step_bps: 50.0,
            max_hold_time_hours: 24.0,
            tp_smart_placement: SmartPlacementConfig::default(),
        }
    }
}

impl PositionConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        let ladder: Vec<TpLevel> = self.tp_levels.iter().map(|t| t.to_tp_level()).collect();
        validate_tp_ladder(&ladder)?;
        for (name, value) in [
            ("breakeven_trigger_r", self.breakeven_trigger_r),
            ("breakeven_buffer_bps", self.breakeven_buffer_bps),
            ("trailing_activation_r", self.trailing_activation_r),
            ("trailing_step_bps", self.trailing_step_bps),
            ("max_hold_time_hours", self.max_hold_time_hours),
        ] {
            if value < 0.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Entry-confirmation state machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmConfig {
    pub enabled: bool,
    /// Bars the fill must survive before the position runs.
    pub entry_confirm_bars: u32,
    /// Maximum entry slippage tolerated during confirmation, in bps.
    pub max_entry_slippage_bps: f64,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entry_confirm_bars: 1,
            max_entry_slippage_bps: 30.0,
        }
    }
}

/// Rule-driven early exit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRulesConfig {
    pub failed_breakout_enabled: bool,
    /// Bars before the failed-breakout rule engages.
    pub failed_breakout_bars: u32,
    pub activity_drop_enabled: bool,
    pub activity_drop_window_bars: u32,
    /// Volume or momentum ratio below this flags an activity drop.
    pub activity_drop_threshold: f64,
    pub weak_impulse_enabled: bool,
    pub weak_impulse_check_bars: u32,
    /// Minimum favourable move after the check window, percent of entry.
    pub weak_impulse_min_move_pct: f64,
    pub max_hold_time_hours: Option<f64>,
    pub time_stop_minutes: Option<f64>,
}

impl Default for ExitRulesConfig {
    fn default() -> Self {
        Self {
            failed_breakout_enabled: true,
            failed_breakout_bars: 3,
            activity_drop_enabled: true,
            activity_drop_window_bars: 4,
            activity_drop_threshold: 0.4,
            weak_impulse_enabled: true,
            weak_impulse_check_bars: 6,
            weak_impulse_min_move_pct: 0.3,
            max_hold_time_hours: Some(24.0),
            time_stop_minutes: Some(120.0),
        }
    }
}

/// Pre-entry market quality thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQualityConfig {
    pub flat_market_filter_enabled: bool,
    /// Minimum range of the recent bars, percent of price, below which
    /// the market counts as flat.
    pub flat_min_range_pct: f64,
    pub consolidation_filter_enabled: bool,
    /// Bars inspected for consolidation before entry.
    pub consolidation_bars: u32,
    pub noise_filter_enabled: bool,
    /// Direction-change fraction above which the tape counts as noise,
    /// in [0, 1].
    pub noise_threshold: f64,
}

impl Default for MarketQualityConfig {
    fn default() -> Self {
        Self {
            flat_market_filter_enabled: true,
            flat_min_range_pct: 0.15,
            consolidation_filter_enabled: true,
            consolidation_bars: 6,
            noise_filter_enabled: true,
            noise_threshold: 0.75,
        }
    }
}

impl MarketQualityConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.noise_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "noise_threshold must be in [0, 1], got {}",
                self.noise_threshold
            )));
        }
        Ok(())
    }
}

/// Pre-entry validation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRulesConfig {
    pub volume_confirmation_required: bool,
    /// Minimum volume over the recent average on the trigger bar.
    pub volume_confirmation_multiplier: f64,
    /// Maximum |slope| of the approach, percent per bar.
    pub momentum_slope_max_pct: f64,
    pub density_avoidance_enabled: bool,
    /// Keep-away distance from an opposing density, in bps.
    pub density_avoidance_bps: f64,
    /// Minimum close beyond the level for a clean breakout, in bps.
    pub clean_breakout_min_bps: f64,
    /// Maximum bars since the breakout bar.
    pub max_bars_since_breakout: u32,
}

impl Default for EntryRulesConfig {
    fn default() -> Self {
        Self {
            volume_confirmation_required: true,
            volume_confirmation_multiplier: 1.5,
            momentum_slope_max_pct: 2.0,
            density_avoidance_enabled: true,
            density_avoidance_bps: 10.0,
            clean_breakout_min_bps: 5.0,
            max_bars_since_breakout: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(PositionConfig::default().validate().is_ok());
        assert!(MarketQualityConfig::default().validate().is_ok());
    }

    #[test]
    fn test_oversubscribed_ladder_rejected() {
        let mut config = PositionConfig::default();
        config.tp_levels[0].size_pct = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_noise_threshold_domain() {
        let config = MarketQualityConfig {
            noise_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
