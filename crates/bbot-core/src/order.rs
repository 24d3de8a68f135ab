//! Order model and precision helpers.
//!
//! Prices and quantities sent to the venue are stepped with exact
//! decimal arithmetic; float rounding must never produce an amount the
//! venue rejects.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::symbol::Symbol;
use crate::trade::TradeSide;

/// Order type. Only the two the strategies use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// An order as tracked by the engine, live or simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub position_id: Option<String>,
    pub symbol: Symbol,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub qty: f64,
    /// Limit price. None for market orders.
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub avg_fill_price: Option<f64>,
    pub fees_usd: f64,
    pub created_at_ms: i64,
    pub filled_at_ms: Option<i64>,
    /// Venue-assigned id once acknowledged.
    pub exchange_id: Option<String>,
    /// Reduce-only orders may never increase the position.
    #[serde(default)]
    pub reduce_only: bool,
}

impl Order {
    pub fn remaining_qty(&self) -> f64 {
        (self.qty - self.filled_qty).max(0.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Round a quantity down to the venue's step size.
///
/// Returns the stepped value and whether anything was shaved off.
pub fn round_qty_to_step(qty: f64, step: f64) -> Result<(f64, bool), CoreError> {
    if step <= 0.0 {
        return Ok((qty, false));
    }
    let qty_d = Decimal::from_f64(qty)
        .ok_or_else(|| CoreError::InvalidQty(format!("not representable: {qty}")))?;
    let step_d = Decimal::from_f64(step)
        .ok_or_else(|| CoreError::InvalidQty(format!("bad step: {step}")))?;
    let stepped = (qty_d / step_d).floor() * step_d;
    let out = stepped
        .to_f64()
        .ok_or_else(|| CoreError::InvalidQty("stepped qty overflow".to_string()))?;
    Ok((out, (qty_d - stepped).abs() > Decimal::ZERO))
}

/// Round a price to the venue tick, toward the passive side.
///
/// Buy prices floor, sell prices ceil, so a stepped limit never crosses
/// further than the caller intended.
pub fn round_price_to_tick(price: f64, tick: f64, side: TradeSide) -> Result<f64, CoreError> {
    if tick <= 0.0 {
        return Ok(price);
    }
    let price_d = Decimal::from_f64(price)
        .ok_or_else(|| CoreError::InvalidPrice(format!("not representable: {price}")))?;
    let tick_d = Decimal::from_f64(tick)
        .ok_or_else(|| CoreError::InvalidPrice(format!("bad tick: {tick}")))?;
    let steps = price_d / tick_d;
    let stepped = match side {
        TradeSide::Buy => steps.floor(),
        TradeSide::Sell => steps.ceil(),
    } * tick_d;
    stepped
        .to_f64()
        .ok_or_else(|| CoreError::InvalidPrice("stepped price overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qty_step_rounds_down() {
        let (q, adjusted) = round_qty_to_step(1.2345, 0.01).unwrap();
        assert!((q - 1.23).abs() < 1e-12);
        assert!(adjusted);

        let (q, adjusted) = round_qty_to_step(1.23, 0.01).unwrap();
        assert!((q - 1.23).abs() < 1e-12);
        assert!(!adjusted);
    }

    #[test]
    fn test_price_tick_respects_side() {
        let buy = round_price_to_tick(100.017, 0.01, TradeSide::Buy).unwrap();
        let sell = round_price_to_tick(100.011, 0.01, TradeSide::Sell).unwrap();
        assert!((buy - 100.01).abs() < 1e-12);
        assert!((sell - 100.02).abs() < 1e-12);
    }

    #[test]
    fn test_zero_step_passthrough() {
        let (q, adjusted) = round_qty_to_step(1.2345, 0.0).unwrap();
        assert_eq!(q, 1.2345);
        assert!(!adjusted);
    }
}
