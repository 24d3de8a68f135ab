//! Execution abstraction shared by the live and paper paths.

use std::pin::Pin;

use serde::{Deserialize, Serialize};

use bbot_core::{Order, OrderType, Symbol, TradeSide};

use crate::error::VenueResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Account balance in the quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub equity_usd: f64,
    pub available_usd: f64,
}

/// A request to place one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub qty: f64,
    /// Limit price. Ignored for market orders.
    pub price: Option<f64>,
    pub reduce_only: bool,
    pub position_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, side: TradeSide, qty: f64) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            reduce_only: false,
            position_id: None,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn for_position(mut self, position_id: impl Into<String>) -> Self {
        self.position_id = Some(position_id.into());
        self
    }
}

/// Order placement and account access, identical for live and paper.
///
/// Methods return boxed futures so the trait stays object safe; the
/// engine holds an `Arc<dyn ExecutionClient>` chosen at startup.
pub trait ExecutionClient: Send + Sync {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<Order>>;

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        order_id: &'a str,
    ) -> BoxFuture<'a, VenueResult<()>>;

    fn fetch_balance(&self) -> BoxFuture<'_, VenueResult<AccountBalance>>;
}
