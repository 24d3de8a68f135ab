//! Simulated exchange for paper trading.
//!
//! Market orders fill immediately at the last mark plus slippage, fees
//! accrue at the taker rate, and a per-symbol net position ledger settles
//! realised PnL into the quote balance on reducing fills. The order
//! shapes are identical to the live path so nothing downstream can tell
//! the difference.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use bbot_core::{Order, OrderStatus, OrderType, Symbol, TradeSide};

use crate::error::{VenueError, VenueResult};
use crate::execution::{AccountBalance, BoxFuture, ExecutionClient, OrderRequest};

/// Paper exchange configuration.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub initial_balance_usd: f64,
    pub slippage_bps: f64,
    pub taker_fee_bps: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance_usd: 20_000.0,
            slippage_bps: 2.0,
            taker_fee_bps: 5.5,
        }
    }
}

/// Net position per symbol, signed: positive long, negative short.
#[derive(Debug, Clone, Copy, Default)]
struct NetPosition {
    qty: f64,
    avg_price: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    balance_usd: f64,
    marks: HashMap<Symbol, f64>,
    positions: HashMap<Symbol, NetPosition>,
    open_orders: HashMap<String, Order>,
    fills: Vec<Order>,
}

/// Simulated exchange.
pub struct PaperExchange {
    config: PaperConfig,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        let balance = config.initial_balance_usd;
        info!(balance_usd = balance, "Paper exchange started");
        Self {
            config,
            state: Mutex::new(PaperState {
                balance_usd: balance,
                ..Default::default()
            }),
        }
    }

    /// Update the mark price used to fill market orders. Any resting
    /// limit orders crossed by the new mark fill at their limit price.
    pub fn update_mark(&self, symbol: &Symbol, mid: f64) {
        let mut state = self.state.lock();
        state.marks.insert(symbol.clone(), mid);

        let crossed: Vec<String> = state
            .open_orders
            .values()
            .filter(|o| {
                o.symbol == *symbol
                    && o.order_type == OrderType::Limit
                    && match (o.side, o.price) {
                        (TradeSide::Buy, Some(limit)) => mid <= limit,
                        (TradeSide::Sell, Some(limit)) => mid >= limit,
                        _ => false,
                    }
            })
            .map(|o| o.id.clone())
            .collect();

        for id in crossed {
            if let Some(mut order) = state.open_orders.remove(&id) {
                let price = order.price.unwrap_or(mid);
                Self::settle_fill(&self.config, &mut state, &mut order, price);
                state.fills.push(order);
            }
        }
    }

    /// Realised session PnL against the starting balance.
    pub fn session_pnl_usd(&self) -> f64 {
        self.state.lock().balance_usd - self.config.initial_balance_usd
    }

    /// All fills so far, oldest first.
    pub fn fills(&self) -> Vec<Order> {
        self.state.lock().fills.clone()
    }

    fn settle_fill(config: &PaperConfig, state: &mut PaperState, order: &mut Order, price: f64) {
        let notional = price * order.qty;
        let fee = notional * config.taker_fee_bps / 10_000.0;

        let signed_qty = match order.side {
            TradeSide::Buy => order.qty,
            TradeSide::Sell => -order.qty,
        };

        let position = state.positions.entry(order.symbol.clone()).or_default();
        let prev_qty = position.qty;
        let new_qty = prev_qty + signed_qty;

        // Reducing the existing position realises PnL on the closed part.
        if prev_qty != 0.0 && prev_qty.signum() != signed_qty.signum() {
            let closed = signed_qty.abs().min(prev_qty.abs());
            let direction = prev_qty.signum();
            let pnl = (price - position.avg_price) * closed * direction;
            state.balance_usd += pnl;
        }

        if new_qty == 0.0 {
            state.positions.remove(&order.symbol);
        } else if prev_qty.signum() != new_qty.signum() || prev_qty == 0.0 {
            // Fresh position or flipped through flat.
            position.qty = new_qty;
            position.avg_price = price;
        } else if signed_qty.signum() == prev_qty.signum() {
            // Increasing: blend the average entry.
            position.avg_price = (position.avg_price * prev_qty.abs()
                + price * signed_qty.abs())
                / new_qty.abs();
            position.qty = new_qty;
        } else {
            position.qty = new_qty;
        }

        state.balance_usd -= fee;

        order.status = OrderStatus::Filled;
        order.filled_qty = order.qty;
        order.avg_fill_price = Some(price);
        order.fees_usd = fee;
        order.filled_at_ms = Some(chrono::Utc::now().timestamp_millis());

        debug!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            price,
            qty = order.qty,
            fee,
            "Paper fill"
        );
    }

    fn place(&self, request: OrderRequest) -> VenueResult<Order> {
        if request.qty <= 0.0 {
            return Err(VenueError::PaperRejected(format!(
                "non-positive qty: {}",
                request.qty
            )));
        }

        let mut state = self.state.lock();
        let now = chrono::Utc::now().timestamp_millis();
        let mut order = Order {
            id: Uuid::new_v4().to_string(),
            position_id: request.position_id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            qty: request.qty,
            price: request.price,
            status: OrderStatus::Pending,
            filled_qty: 0.0,
            avg_fill_price: None,
            fees_usd: 0.0,
            created_at_ms: now,
            filled_at_ms: None,
            exchange_id: Some(format!("paper-{}", Uuid::new_v4())),
            reduce_only: request.reduce_only,
        };

        match request.order_type {
            OrderType::Market => {
                let mark = *state
                    .marks
                    .get(&request.symbol)
                    .ok_or_else(|| {
                        VenueError::PaperRejected(format!("no mark price for {}", request.symbol))
                    })?;
                // Buys pay up, sells hit down.
                let slip = mark * self.config.slippage_bps / 10_000.0;
                let fill_price = match request.side {
                    TradeSide::Buy => mark + slip,
                    TradeSide::Sell => mark - slip,
                };
                Self::settle_fill(&self.config, &mut state, &mut order, fill_price);
                state.fills.push(order.clone());
            }
            OrderType::Limit => {
                if request.price.is_none() {
                    return Err(VenueError::PaperRejected("limit order without price".into()));
                }
                order.status = OrderStatus::Open;
                state.open_orders.insert(order.id.clone(), order.clone());
            }
        }

        Ok(order)
    }

    fn cancel(&self, order_id: &str) -> VenueResult<()> {
        let mut state = self.state.lock();
        match state.open_orders.remove(order_id) {
            Some(_) => Ok(()),
            None => Err(VenueError::BadRequest(format!(
                "unknown order id: {order_id}"
            ))),
        }
    }

    fn balance(&self) -> AccountBalance {
        let state = self.state.lock();
        // Mark open positions to the last mid for equity.
        let unrealised: f64 = state
            .positions
            .iter()
            .filter_map(|(symbol, pos)| {
                state
                    .marks
                    .get(symbol)
                    .map(|mark| (mark - pos.avg_price) * pos.qty)
            })
            .sum();
        AccountBalance {
            equity_usd: state.balance_usd + unrealised,
            available_usd: state.balance_usd,
        }
    }
}

impl ExecutionClient for PaperExchange {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<Order>> {
        Box::pin(async move { self.place(request) })
    }

    fn cancel_order<'a>(
        &'a self,
        _symbol: &'a Symbol,
        order_id: &'a str,
    ) -> BoxFuture<'a, VenueResult<()>> {
        Box::pin(async move { self.cancel(order_id) })
    }

    fn fetch_balance(&self) -> BoxFuture<'_, VenueResult<AccountBalance>> {
        Box::pin(async move { Ok(self.balance()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::OrderType;

    fn exchange() -> PaperExchange {
        PaperExchange::new(PaperConfig {
            initial_balance_usd: 10_000.0,
            slippage_bps: 10.0,
            taker_fee_bps: 0.0,
        })
    }

    #[tokio::test]
    async fn test_market_buy_fills_with_slippage() {
        let ex = exchange();
        let sym = Symbol::new("BTCUSDT");
        ex.update_mark(&sym, 100.0);

        let order = ex
            .place_order(OrderRequest::market(sym.clone(), TradeSide::Buy, 1.0))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        // 10 bps of slippage on a 100.0 mark.
        assert!((order.avg_fill_price.unwrap() - 100.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_round_trip_realises_pnl() {
        let ex = PaperExchange::new(PaperConfig {
            initial_balance_usd: 10_000.0,
            slippage_bps: 0.0,
            taker_fee_bps: 0.0,
        });
        let sym = Symbol::new("ETHUSDT");

        ex.update_mark(&sym, 100.0);
        ex.place_order(OrderRequest::market(sym.clone(), TradeSide::Buy, 2.0))
            .await
            .unwrap();

        ex.update_mark(&sym, 110.0);
        ex.place_order(
            OrderRequest::market(sym.clone(), TradeSide::Sell, 2.0).reduce_only(),
        )
        .await
        .unwrap();

        assert!((ex.session_pnl_usd() - 20.0).abs() < 1e-9);
        let balance = ex.fetch_balance().await.unwrap();
        assert!((balance.equity_usd - 10_020.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_limit_order_fills_when_crossed() {
        let ex = exchange();
        let sym = Symbol::new("SOLUSDT");
        ex.update_mark(&sym, 50.0);

        let order = ex
            .place_order(OrderRequest {
                symbol: sym.clone(),
                side: TradeSide::Buy,
                order_type: OrderType::Limit,
                qty: 1.0,
                price: Some(48.0),
                reduce_only: false,
                position_id: None,
            })
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);

        ex.update_mark(&sym, 47.5);
        let fills = ex.fills();
        assert_eq!(fills.len(), 1);
        assert!((fills[0].avg_fill_price.unwrap() - 48.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_market_order_without_mark_is_rejected() {
        let ex = exchange();
        let err = ex
            .place_order(OrderRequest::market(
                Symbol::new("XRPUSDT"),
                TradeSide::Buy,
                1.0,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::PaperRejected(_)));
    }
}
