//! Entry signals produced by the strategies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::symbol::Symbol;

/// Direction of a position or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Strategy that produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Momentum,
    Retest,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Momentum => write!(f, "momentum"),
            Self::Retest => write!(f, "retest"),
        }
    }
}

/// A fully formed entry signal.
///
/// `entry` and `sl` define the trade geometry: `sign(entry - sl)` must
/// agree with `side`, and `|entry - sl|` is the 1R unit for sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub side: Side,
    pub strategy: Strategy,
    pub reason: String,
    pub entry: f64,
    /// The level that the signal keys off.
    pub level: f64,
    pub sl: f64,
    pub tp1: Option<f64>,
    pub tp2: Option<f64>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub ts_ms: i64,
    /// Free-form metadata: sizing hints, market snapshot values.
    #[serde(default)]
    pub meta: BTreeMap<String, f64>,
}

impl Signal {
    /// Stop distance in price units; the 1R unit.
    pub fn r_unit(&self) -> f64 {
        (self.entry - self.sl).abs()
    }

    /// Direction consistency between side and stop placement.
    pub fn is_consistent(&self) -> bool {
        let diff = self.entry - self.sl;
        match self.side {
            Side::Long => diff > 0.0,
            Side::Short => diff < 0.0,
        }
    }
}
