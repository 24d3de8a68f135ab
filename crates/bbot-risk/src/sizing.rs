//! R-unit position sizing.
//!
//! The USD risk budget is equity times risk-per-trade; quantity is the
//! budget divided by the stop distance, clamped by the max notional cap
//! and by a fraction of the aggregated book depth, then stepped down to
//! the venue's quantity precision. Rounding only ever shrinks the
//! position, so the realised risk never exceeds the budget.

use serde::{Deserialize, Serialize};
use tracing::debug;

use bbot_core::round_qty_to_step;

/// Sizing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeResult {
    pub quantity: f64,
    pub notional_usd: f64,
    pub risk_usd: f64,
    /// Risk in R units; 1.0 when the full budget is deployed.
    pub risk_r: f64,
    pub stop_distance: f64,
    pub is_valid: bool,
    pub reason: String,
    pub precision_adjusted: bool,
}

impl SizeResult {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            quantity: 0.0,
            notional_usd: 0.0,
            risk_usd: 0.0,
            risk_r: 0.0,
            stop_distance: 0.0,
            is_valid: false,
            reason: reason.into(),
            precision_adjusted: false,
        }
    }
}

/// Inputs beyond the trade geometry.
#[derive(Debug, Clone, Copy)]
pub struct SizingInputs {
    pub equity_usd: f64,
    pub risk_per_trade: f64,
    pub max_position_size_usd: f64,
    /// Aggregated book depth in USD near the touch, when known.
    pub depth_usd: Option<f64>,
    /// Fraction of that depth the position may consume.
    pub max_depth_fraction: f64,
    /// Venue quantity step. Zero disables stepping.
    pub qty_step: f64,
}

/// Size a position for the given entry and stop.
pub fn size_position(entry: f64, sl: f64, inputs: SizingInputs) -> SizeResult {
    let stop_distance = (entry - sl).abs();
    if stop_distance <= 0.0 {
        return SizeResult::invalid("zero stop distance");
    }
    if entry <= 0.0 {
        return SizeResult::invalid("non-positive entry price");
    }
    if inputs.equity_usd <= 0.0 {
        return SizeResult::invalid("no equity");
    }

    let risk_budget_usd = inputs.equity_usd * inputs.risk_per_trade;
    if risk_budget_usd <= 0.0 {
        return SizeResult::invalid("zero risk budget");
    }

    let mut quantity = risk_budget_usd / stop_distance;
    let mut reason = "full budget".to_string();

    // Notional cap.
    if inputs.max_position_size_usd > 0.0 {
        let cap_qty = inputs.max_position_size_usd / entry;
        if cap_qty < quantity {
            quantity = cap_qty;
            reason = "clamped by max position size".to_string();
        }
    }

    // Depth cap: do not be the whole book.
    if let Some(depth_usd) = inputs.depth_usd {
        let depth_cap_qty = depth_usd * inputs.max_depth_fraction / entry;
        if depth_cap_qty < quantity {
            quantity = depth_cap_qty;
            reason = "clamped by book depth".to_string();
        }
    }

    let (stepped, precision_adjusted) = match round_qty_to_step(quantity, inputs.qty_step) {
        Ok(v) => v,
        Err(e) => return SizeResult::invalid(format!("precision: {e}")),
    };
    quantity = stepped;

    if quantity <= 0.0 {
        return SizeResult::invalid("quantity rounds to zero");
    }

    let risk_usd = quantity * stop_distance;
    let result = SizeResult {
        quantity,
        notional_usd: quantity * entry,
        risk_usd,
        risk_r: risk_usd / risk_budget_usd,
        stop_distance,
        is_valid: true,
        reason,
        precision_adjusted,
    };
    debug!(
        qty = result.quantity,
        notional = result.notional_usd,
        risk_usd = result.risk_usd,
        "Position sized"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> SizingInputs {
        SizingInputs {
            equity_usd: 20_000.0,
            risk_per_trade: 0.01,
            max_position_size_usd: 1_000_000.0,
            depth_usd: None,
            max_depth_fraction: 0.1,
            qty_step: 0.0,
        }
    }

    #[test]
    fn test_risk_never_exceeds_budget() {
        let result = size_position(100.0, 99.0, inputs());
        assert!(result.is_valid);
        // Budget is 200 USD at 1R distance 1.0.
        assert!((result.quantity - 200.0).abs() < 1e-9);
        let budget = 20_000.0 * 0.01;
        assert!(result.quantity * result.stop_distance <= budget * (1.0 + 1e-9));
        assert!((result.risk_r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_invariant_survives_stepping() {
        let result = size_position(
            103.37,
            101.91,
            SizingInputs {
                qty_step: 0.01,
                ..inputs()
            },
        );
        assert!(result.is_valid);
        assert!(result.precision_adjusted);
        let budget = 20_000.0 * 0.01;
        assert!(result.quantity * result.stop_distance <= budget * (1.0 + 1e-9));
    }

    #[test]
    fn test_notional_cap_applies() {
        let result = size_position(
            100.0,
            99.5,
            SizingInputs {
                max_position_size_usd: 5_000.0,
                ..inputs()
            },
        );
        // Full budget would be 400 qty / 40k notional; capped to 50 qty.
        assert!((result.quantity - 50.0).abs() < 1e-9);
        assert_eq!(result.reason, "clamped by max position size");
        assert!(result.risk_r < 1.0);
    }

    #[test]
    fn test_depth_cap_applies() {
        let result = size_position(
            100.0,
            99.0,
            SizingInputs {
                depth_usd: Some(10_000.0),
                ..inputs()
            },
        );
        // 10% of 10k depth is 1k notional, 10 qty.
        assert!((result.quantity - 10.0).abs() < 1e-9);
        assert_eq!(result.reason, "clamped by book depth");
    }

    #[test]
    fn test_zero_stop_distance_is_invalid() {
        let result = size_position(100.0, 100.0, inputs());
        assert!(!result.is_valid);
        assert_eq!(result.quantity, 0.0);
    }
}
