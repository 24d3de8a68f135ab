//! Public trade types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggressor side of a public trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn is_buy(&self) -> bool {
        matches!(self, Self::Buy)
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// A single public trade, normalised from the venue stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue timestamp in milliseconds.
    pub ts_ms: i64,
    pub price: f64,
    pub amount: f64,
    pub side: TradeSide,
}

impl Trade {
    pub fn new(ts_ms: i64, price: f64, amount: f64, side: TradeSide) -> Self {
        Self {
            ts_ms,
            price,
            amount,
            side,
        }
    }

    /// Signed amount: positive for buys, negative for sells.
    pub fn signed_amount(&self) -> f64 {
        match self.side {
            TradeSide::Buy => self.amount,
            TradeSide::Sell => -self.amount,
        }
    }
}
