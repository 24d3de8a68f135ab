//! Scan metric computation.
//!
//! Volume surges and the ATR quality measure are derived from the 5m
//! candle history; the rest comes straight off the fact table.

use serde::{Deserialize, Serialize};

use bbot_core::{indicators, MarketData};

/// Derived metrics for one market scan.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanMetrics {
    /// Mean of the last 12 bars' volume over the previous 12.
    pub vol_surge_1h: f64,
    /// Last bar's volume over the median of the prior 20.
    pub vol_surge_5m: f64,
    pub oi_delta_24h: f64,
    /// Bell-shaped quality of ATR/price, peaked in the optimal band.
    pub atr_quality: f64,
    pub bb_width_pct: f64,
    pub btc_correlation: f64,
    pub trades_per_minute: f64,
}

/// ATR/price band considered optimal for breakout trading.
const ATR_OPTIMAL_MIN: f64 = 0.015;
const ATR_OPTIMAL_MAX: f64 = 0.035;

impl ScanMetrics {
    pub fn compute(market: &MarketData) -> Self {
        let candles = &market.candles_5m;
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let mut vol_surge_1h = 1.0;
        if volumes.len() >= 24 {
            let recent = indicators::mean(&volumes[volumes.len() - 12..]);
            let older = indicators::mean(&volumes[volumes.len() - 24..volumes.len() - 12]);
            if older > 0.0 {
                vol_surge_1h = recent / older;
            }
        }

        let mut vol_surge_5m = 1.0;
        if volumes.len() >= 21 {
            let current = volumes[volumes.len() - 1];
            let median = indicators::median(&volumes[volumes.len() - 21..volumes.len() - 1]);
            if median > 0.0 {
                vol_surge_5m = current / median;
            }
        }

        let atr_quality = if candles.len() >= 15 && market.price > 0.0 {
            indicators::atr(candles, 14)
                .map(|atr| atr_quality(atr / market.price))
                .unwrap_or(0.0)
        } else {
            0.0
        };

        Self {
            vol_surge_1h,
            vol_surge_5m,
            oi_delta_24h: market.oi_change_24h.unwrap_or(0.0),
            atr_quality,
            bb_width_pct: market.bb_width_pct,
            btc_correlation: market.btc_correlation,
            trades_per_minute: market.trades_per_minute,
        }
    }
}

/// Quality in [0, 1], peaking at the middle of the optimal band and
/// falling off linearly outside it.
fn atr_quality(atr_ratio: f64) -> f64 {
    let mid = (ATR_OPTIMAL_MIN + ATR_OPTIMAL_MAX) / 2.0;
    let width = ATR_OPTIMAL_MAX - ATR_OPTIMAL_MIN;
    if (ATR_OPTIMAL_MIN..=ATR_OPTIMAL_MAX).contains(&atr_ratio) {
        1.0 - (atr_ratio - mid).abs() / width
    } else if atr_ratio < ATR_OPTIMAL_MIN {
        (1.0 - (ATR_OPTIMAL_MIN - atr_ratio) / ATR_OPTIMAL_MIN).max(0.0)
    } else {
        (1.0 - (atr_ratio - ATR_OPTIMAL_MAX) / ATR_OPTIMAL_MAX).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::{Candle, Symbol};

    fn market_with_volumes(volumes: &[f64]) -> MarketData {
        let candles: Vec<Candle> = volumes
            .iter()
            .enumerate()
            .map(|(i, v)| Candle::new(i as i64 * 300_000, 100.0, 101.0, 99.0, 100.0, *v))
            .collect();
        MarketData {
            symbol: Symbol::new("TESTUSDT"),
            price: 100.0,
            volume_24h_usd: 0.0,
            oi_usd: None,
            oi_change_24h: None,
            trades_per_minute: 0.0,
            atr_5m: 0.0,
            atr_15m: 0.0,
            bb_width_pct: 0.0,
            btc_correlation: 0.0,
            l2_depth: None,
            candles_5m: candles,
            ts_ms: 0,
        }
    }

    #[test]
    fn test_surges_default_to_one_on_short_history() {
        let metrics = ScanMetrics::compute(&market_with_volumes(&[100.0; 5]));
        assert_eq!(metrics.vol_surge_1h, 1.0);
        assert_eq!(metrics.vol_surge_5m, 1.0);
    }

    #[test]
    fn test_vol_surge_5m_vs_prior_median() {
        let mut volumes = vec![1_000.0; 25];
        *volumes.last_mut().unwrap() = 5_000.0;
        let metrics = ScanMetrics::compute(&market_with_volumes(&volumes));
        assert!((metrics.vol_surge_5m - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_vol_surge_1h_recent_vs_older() {
        let mut volumes = vec![1_000.0; 12];
        volumes.extend(vec![2_000.0; 12]);
        let metrics = ScanMetrics::compute(&market_with_volumes(&volumes));
        assert!((metrics.vol_surge_1h - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_quality_peaks_mid_band() {
        assert!((atr_quality(0.025) - 1.0).abs() < 1e-9);
        assert!(atr_quality(0.015) < 1.0);
        assert!(atr_quality(0.10) < atr_quality(0.04));
        assert!(atr_quality(0.0005) < 0.1);
    }
}
