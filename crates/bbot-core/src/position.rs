//! Position model and take-profit ladder.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::signal::{Side, Strategy};
use crate::symbol::Symbol;

/// How a take-profit price is placed relative to its R target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    /// Entry + R multiple, unadjusted.
    Fixed,
    /// Fixed, then nudged away from density zones and nearby levels.
    Smart,
    /// Smart, widened further when realised volatility expanded.
    Adaptive,
}

impl fmt::Display for PlacementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Smart => write!(f, "smart"),
            Self::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// One rung of the take-profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpLevel {
    /// Reward multiple in R units. Must be positive.
    pub reward_multiple: f64,
    /// Fraction of position quantity closed at this rung, in (0, 1].
    pub size_pct: f64,
    pub placement_mode: PlacementMode,
    #[serde(default)]
    pub triggered: bool,
}

impl TpLevel {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.reward_multiple <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "reward_multiple must be positive, got {}",
                self.reward_multiple
            )));
        }
        if self.size_pct <= 0.0 || self.size_pct > 1.0 {
            return Err(CoreError::InvalidConfig(format!(
                "size_pct must be in (0, 1], got {}",
                self.size_pct
            )));
        }
        Ok(())
    }
}

/// Validate a whole ladder: every rung valid and sizes summing to at most 1.
pub fn validate_tp_ladder(levels: &[TpLevel]) -> Result<(), CoreError> {
    for level in levels {
        level.validate()?;
    }
    let total: f64 = levels.iter().map(|l| l.size_pct).sum();
    if total > 1.0 + 1e-9 {
        return Err(CoreError::InvalidConfig(format!(
            "tp ladder size_pct sums to {total:.4}, must not exceed 1.0"
        )));
    }
    Ok(())
}

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Pending,
    Open,
    Partial,
    Closed,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Partial)
    }
}

/// State names of the per-position exit machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmState {
    Pending,
    EntryConfirm,
    Running,
    Breakeven,
    PartialClosed,
    Trailing,
    Exiting,
    Closed,
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::EntryConfirm => "entry_confirm",
            Self::Running => "running",
            Self::Breakeven => "breakeven",
            Self::PartialClosed => "partial_closed",
            Self::Trailing => "trailing",
            Self::Exiting => "exiting",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// An open or historical position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub strategy: Strategy,
    /// Remaining quantity in base units.
    pub qty: f64,
    pub entry: f64,
    pub sl: f64,
    pub tp_levels: Vec<TpLevel>,
    pub status: PositionStatus,
    pub realized_pnl_usd: f64,
    pub unrealized_pnl_r: f64,
    /// Most favourable price seen since entry (highest for longs).
    pub highest_seen: f64,
    /// Least favourable extreme tracked for shorts.
    pub lowest_seen: f64,
    /// Level whose breakout opened this position.
    pub breakout_level: f64,
    pub opened_at_ms: i64,
    pub closed_at_ms: Option<i64>,
    pub fsm_state: FsmState,
}

impl Position {
    /// The 1R unit in price terms.
    pub fn r_unit(&self) -> f64 {
        (self.entry - self.sl).abs()
    }

    /// Current favourable excursion in R for the given price.
    pub fn excursion_r(&self, price: f64) -> f64 {
        let r = self.r_unit();
        if r <= 0.0 {
            return 0.0;
        }
        (price - self.entry) * self.side.sign() / r
    }

    /// Update the favourable/adverse extremes from a new price.
    pub fn observe_price(&mut self, price: f64) {
        if price > self.highest_seen {
            self.highest_seen = price;
        }
        if price < self.lowest_seen {
            self.lowest_seen = price;
        }
    }

    pub fn is_profitable_at(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price > self.entry,
            Side::Short => price < self.entry,
        }
    }
}
