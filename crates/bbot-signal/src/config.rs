//! Signal generation configuration.

use serde::{Deserialize, Serialize};

use bbot_core::{CoreError, Strategy};

/// Thresholds for both strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Breakout fraction beyond the level for momentum entries.
    pub momentum_epsilon: f64,
    /// Last volume over the mean of the prior 20 bars.
    pub momentum_volume_multiplier: f64,
    /// Minimum body over range of the breakout bar.
    pub momentum_body_ratio_min: f64,
    /// Book imbalance needed on the breakout side.
    pub l2_imbalance_threshold: f64,
    /// Maximum |price - vwap| in ATR units.
    pub vwap_gap_max_atr: f64,
    /// Retest proximity to the level, fraction of price.
    pub retest_proximity_frac: f64,
    /// Maximum pierce through the level, in ATR units.
    pub retest_max_pierce_atr: f64,
    /// Maximum pierce as a fraction of the level price.
    pub retest_pierce_tolerance: f64,
    /// Minimum activity index for retest entries.
    pub min_activity_index: f64,
    /// Stop buffer beyond the structural point, in ATR units.
    pub sl_atr_buffer: f64,
    /// Bars scanned for the protective swing extreme.
    pub swing_lookback_bars: usize,
    /// Preferred strategy tried first.
    pub strategy_priority: Strategy,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            momentum_epsilon: 0.001,
            momentum_volume_multiplier: 2.0,
            momentum_body_ratio_min: 0.5,
            l2_imbalance_threshold: 0.3,
            vwap_gap_max_atr: 2.0,
            retest_proximity_frac: 0.005,
            retest_max_pierce_atr: 0.5,
            retest_pierce_tolerance: 0.003,
            min_activity_index: 0.0,
            sl_atr_buffer: 0.5,
            swing_lookback_bars: 10,
            strategy_priority: Strategy::Momentum,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("momentum_epsilon", self.momentum_epsilon),
            ("momentum_volume_multiplier", self.momentum_volume_multiplier),
            ("momentum_body_ratio_min", self.momentum_body_ratio_min),
            ("l2_imbalance_threshold", self.l2_imbalance_threshold),
            ("vwap_gap_max_atr", self.vwap_gap_max_atr),
            ("retest_proximity_frac", self.retest_proximity_frac),
            ("retest_max_pierce_atr", self.retest_max_pierce_atr),
            ("retest_pierce_tolerance", self.retest_pierce_tolerance),
            ("sl_atr_buffer", self.sl_atr_buffer),
        ] {
            if value < 0.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if self.swing_lookback_bars == 0 {
            return Err(CoreError::InvalidConfig(
                "swing_lookback_bars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
