//! Weighted composite scoring.
//!
//! Each component is a clipped-to-[-3, 3] normaliser over its metric;
//! the score is the weight-multiplied sum. Weights are validated at
//! construction and a total magnitude far from 1.0 logs a warning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tracing::warn;

use crate::metrics::ScanMetrics;

/// Component weights for the composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub vol_surge: f64,
    pub atr_quality: f64,
    pub correlation: f64,
    pub trades_per_minute: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            vol_surge: 0.4,
            atr_quality: 0.25,
            correlation: 0.15,
            trades_per_minute: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn total_magnitude(&self) -> f64 {
        self.vol_surge.abs()
            + self.atr_quality.abs()
            + self.correlation.abs()
            + self.trades_per_minute.abs()
    }
}

/// Normaliser reference points, chosen from observed universe medians.
const VOL_SURGE_MEAN: f64 = 1.5;
const VOL_SURGE_STD: f64 = 1.0;
const ATR_QUALITY_MEAN: f64 = 0.5;
const ATR_QUALITY_STD: f64 = 0.2;
const LOG_TPM_MEAN: f64 = 2.0;
const LOG_TPM_STD: f64 = 1.0;

/// Composite scorer.
#[derive(Debug, Clone)]
pub struct MarketScorer {
    weights: ScoreWeights,
}

impl MarketScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        let total = weights.total_magnitude();
        if !(0.8..=1.2).contains(&total) {
            warn!(total, "Score weights sum far from 1.0");
        }
        Self { weights }
    }

    /// Score one market. Returns the total and the per-component terms.
    pub fn score(&self, metrics: &ScanMetrics) -> (f64, BTreeMap<String, f64>) {
        let mut components = BTreeMap::new();

        components.insert(
            "vol_surge".to_string(),
            normalize_vol_surge(metrics.vol_surge_1h, metrics.vol_surge_5m) * self.weights.vol_surge,
        );
        components.insert(
            "atr_quality".to_string(),
            normalize_atr_quality(metrics.atr_quality) * self.weights.atr_quality,
        );
        components.insert(
            "correlation".to_string(),
            normalize_correlation(metrics.btc_correlation) * self.weights.correlation,
        );
        components.insert(
            "trades_per_minute".to_string(),
            normalize_trades_per_minute(metrics.trades_per_minute) * self.weights.trades_per_minute,
        );

        let total = components.values().sum();
        (total, components)
    }
}

/// Combined surge z-score: 60% hourly, 40% five-minute.
fn normalize_vol_surge(surge_1h: f64, surge_5m: f64) -> f64 {
    let combined = surge_1h * 0.6 + surge_5m * 0.4;
    clip((combined - VOL_SURGE_MEAN) / VOL_SURGE_STD)
}

fn normalize_atr_quality(atr_quality: f64) -> f64 {
    clip((atr_quality - ATR_QUALITY_MEAN) / ATR_QUALITY_STD)
}

/// Lower |correlation| scores higher: 2 * (1 - |rho|) - 1.
fn normalize_correlation(correlation: f64) -> f64 {
    clip(2.0 * (1.0 - correlation.abs()) - 1.0)
}

/// Log-normalised trade rate. Zero activity pins to the floor.
fn normalize_trades_per_minute(tpm: f64) -> f64 {
    if tpm <= 0.0 {
        return -3.0;
    }
    clip((tpm.ln() - LOG_TPM_MEAN) / LOG_TPM_STD)
}

fn clip(z: f64) -> f64 {
    z.clamp(-3.0, 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_are_clipped() {
        let scorer = MarketScorer::new(ScoreWeights {
            vol_surge: 1.0,
            atr_quality: 0.0,
            correlation: 0.0,
            trades_per_minute: 0.0,
        });
        let metrics = ScanMetrics {
            vol_surge_1h: 100.0,
            vol_surge_5m: 100.0,
            ..Default::default()
        };
        let (score, components) = scorer.score(&metrics);
        assert!((score - 3.0).abs() < 1e-9);
        assert_eq!(components.len(), 4);
    }

    #[test]
    fn test_zero_tpm_floors_component() {
        assert_eq!(normalize_trades_per_minute(0.0), -3.0);
    }

    #[test]
    fn test_correlation_prefers_uncorrelated() {
        assert!(normalize_correlation(0.0) > normalize_correlation(0.9));
        assert_eq!(normalize_correlation(0.5), normalize_correlation(-0.5));
    }

    #[test]
    fn test_higher_surge_scores_higher() {
        let calm = normalize_vol_surge(1.0, 1.0);
        let hot = normalize_vol_surge(3.0, 4.0);
        assert!(hot > calm);
    }
}
