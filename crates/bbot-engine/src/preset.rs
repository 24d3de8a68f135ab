//! Preset loading and validation.
//!
//! A preset is a named JSON bundle with every threshold the engine
//! needs. Unknown sections are rejected; every numeric constraint is
//! checked at load time so a bad preset never reaches the trading loop.

use std::path::Path;

use serde::{Deserialize, Serialize};

use bbot_core::Strategy;
use bbot_features::{DensityConfig, LevelConfig};
use bbot_position::{
    EntryRulesConfig, ExitRulesConfig, FsmConfig, MarketQualityConfig, PositionConfig,
};
use bbot_risk::RiskConfig;
use bbot_scanner::{LiquidityFilters, ScannerSettings, VolatilityFilters};
use bbot_signal::SignalConfig;

use crate::error::{EngineError, EngineResult};

/// Execution path parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub taker_fee_bps: f64,
    pub maker_fee_bps: f64,
    /// Offset for passive limit entries, in bps.
    pub limit_offset_bps: f64,
    /// Extra tolerance when the spread widens, in bps.
    pub spread_widen_bps: f64,
    /// Cancel-on-silence watchdog for resting orders.
    pub deadman_timeout_ms: u64,
    /// Paper-fill slippage, in bps.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
}

fn default_slippage_bps() -> f64 {
    2.0
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            taker_fee_bps: 5.5,
            maker_fee_bps: 1.0,
            limit_offset_bps: 1.0,
            spread_widen_bps: 5.0,
            deadman_timeout_ms: 30_000,
            slippage_bps: 2.0,
        }
    }
}

/// A complete validated configuration bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_markets: Option<Vec<String>>,
    pub strategy_priority: Strategy,
    pub risk: RiskConfig,
    pub liquidity_filters: LiquidityFilters,
    pub volatility_filters: VolatilityFilters,
    pub signal_config: SignalConfig,
    #[serde(default)]
    pub entry_rules: EntryRulesConfig,
    pub position_config: PositionConfig,
    #[serde(default)]
    pub exit_rules: ExitRulesConfig,
    #[serde(default)]
    pub fsm: FsmConfig,
    #[serde(default)]
    pub market_quality: MarketQualityConfig,
    #[serde(default)]
    pub levels_rules: LevelConfig,
    pub scanner_config: ScannerSettings,
    #[serde(default)]
    pub density_config: DensityConfig,
    #[serde(default)]
    pub execution_config: ExecutionConfig,
}

impl Preset {
    /// Load and validate a preset from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let preset: Preset = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Preset(format!("parse failure: {e}")))?;
        preset.validate()?;
        Ok(preset)
    }

    /// Check every numeric constraint.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.is_empty() {
            return Err(EngineError::Preset("preset name is empty".to_string()));
        }
        self.risk
            .validate()
            .map_err(|e| EngineError::Preset(e.to_string()))?;
        self.signal_config
            .validate()
            .map_err(|e| EngineError::Preset(e.to_string()))?;
        self.position_config
            .validate()
            .map_err(|e| EngineError::Preset(e.to_string()))?;
        self.market_quality
            .validate()
            .map_err(|e| EngineError::Preset(e.to_string()))?;

        for (name, value) in [
            ("min_24h_volume_usd", self.liquidity_filters.min_24h_volume_usd),
            ("min_oi_usd", self.liquidity_filters.min_oi_usd),
            ("max_spread_bps", self.liquidity_filters.max_spread_bps),
            (
                "min_depth_usd_0_5pct",
                self.liquidity_filters.min_depth_usd_0_5pct,
            ),
            (
                "min_depth_usd_0_3pct",
                self.liquidity_filters.min_depth_usd_0_3pct,
            ),
            (
                "min_trades_per_minute",
                self.liquidity_filters.min_trades_per_minute,
            ),
            ("atr_range_min", self.volatility_filters.atr_range_min),
            ("atr_range_max", self.volatility_filters.atr_range_max),
            (
                "bb_width_percentile_max",
                self.volatility_filters.bb_width_percentile_max,
            ),
            ("volume_surge_1h_min", self.volatility_filters.volume_surge_1h_min),
            ("volume_surge_5m_min", self.volatility_filters.volume_surge_5m_min),
            ("oi_delta_threshold", self.volatility_filters.oi_delta_threshold),
            ("taker_fee_bps", self.execution_config.taker_fee_bps),
            ("maker_fee_bps", self.execution_config.maker_fee_bps),
            ("limit_offset_bps", self.execution_config.limit_offset_bps),
            ("spread_widen_bps", self.execution_config.spread_widen_bps),
            ("trailing_step_bps", self.position_config.trailing_step_bps),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(EngineError::Preset(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.volatility_filters.atr_range_min > self.volatility_filters.atr_range_max {
            return Err(EngineError::Preset(format!(
                "atr_range_min {} exceeds atr_range_max {}",
                self.volatility_filters.atr_range_min, self.volatility_filters.atr_range_max
            )));
        }
        if self.scanner_config.max_candidates == 0 {
            return Err(EngineError::Preset(
                "max_candidates must be at least 1".to_string(),
            ));
        }
        if self.levels_rules.min_touches < 2 {
            return Err(EngineError::Preset(
                "levels_rules.min_touches must be at least 2".to_string(),
            ));
        }
        for (name, bars) in [
            ("failed_breakout_bars", self.exit_rules.failed_breakout_bars),
            (
                "activity_drop_window_bars",
                self.exit_rules.activity_drop_window_bars,
            ),
            (
                "weak_impulse_check_bars",
                self.exit_rules.weak_impulse_check_bars,
            ),
            ("consolidation_bars", self.market_quality.consolidation_bars),
        ] {
            if bars == 0 {
                return Err(EngineError::Preset(format!(
                    "{name} must cover at least one bar"
                )));
            }
        }
        Ok(())
    }

    /// A conservative ready-to-run preset used by tests and `--example`.
    pub fn example() -> Self {
        Self {
            name: "breakout-default".to_string(),
            description: "Momentum-first breakout preset with retest fallback".to_string(),
            target_markets: None,
            strategy_priority: Strategy::Momentum,
            risk: RiskConfig::default(),
            liquidity_filters: LiquidityFilters::default(),
            volatility_filters: VolatilityFilters::default(),
            signal_config: SignalConfig::default(),
            entry_rules: EntryRulesConfig::default(),
            position_config: PositionConfig::default(),
            exit_rules: ExitRulesConfig::default(),
            fsm: FsmConfig::default(),
            market_quality: MarketQualityConfig::default(),
            levels_rules: LevelConfig::default(),
            scanner_config: ScannerSettings::default(),
            density_config: DensityConfig::default(),
            execution_config: ExecutionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_preset_validates() {
        assert!(Preset::example().validate().is_ok());
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        let preset = Preset::example();
        let json = serde_json::to_string_pretty(&preset).unwrap();
        let back: Preset = serde_json::from_str(&json).unwrap();
        let json_again = serde_json::to_string_pretty(&back).unwrap();
        assert_eq!(json, json_again);
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut preset = Preset::example();
        preset.liquidity_filters.max_spread_bps = -1.0;
        assert!(preset.validate().is_err());
    }

    #[test]
    fn test_bad_tp_ladder_rejected() {
        let mut preset = Preset::example();
        preset.position_config.tp_levels[0].size_pct = 1.5;
        assert!(preset.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut value = serde_json::to_value(Preset::example()).unwrap();
        value["surprise_section"] = serde_json::json!({});
        assert!(serde_json::from_value::<Preset>(value).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("bbot-preset-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&Preset::example()).unwrap()).unwrap();
        let loaded = Preset::load(&path).unwrap();
        assert_eq!(loaded.name, "breakout-default");
        std::fs::remove_file(&path).ok();
    }
}
