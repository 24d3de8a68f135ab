//! Horizontal trading levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a level acts as support or resistance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Support,
    Resistance,
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Support => write!(f, "support"),
            Self::Resistance => write!(f, "resistance"),
        }
    }
}

/// A clustered horizontal level derived from candle highs/lows.
///
/// Strength grows with touch count and recency and may carry a bonus when
/// the price sits near a round-number step. Levels inside a dense band of
/// neighbours are flagged as part of a cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingLevel {
    pub price: f64,
    pub kind: LevelKind,
    /// Number of distinct touches; always at least 2.
    pub touch_count: u32,
    /// Normalised strength in [0, 1].
    pub strength: f64,
    pub first_touch_ts: i64,
    pub last_touch_ts: i64,
    pub is_round_number: bool,
    pub round_bonus: f64,
    pub in_cascade: bool,
    pub cascade_size: u32,
}

impl TradingLevel {
    /// Distance from `price` to the level as a fraction of the level price.
    pub fn distance_frac(&self, price: f64) -> f64 {
        if self.price <= 0.0 {
            return f64::INFINITY;
        }
        (price - self.price).abs() / self.price
    }

    /// Breakout direction implied by the level kind.
    ///
    /// Resistance breaks upward (long), support breaks downward (short).
    pub fn breakout_sign(&self) -> f64 {
        match self.kind {
            LevelKind::Resistance => 1.0,
            LevelKind::Support => -1.0,
        }
    }
}
