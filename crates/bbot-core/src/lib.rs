//! Core data model for the breakout trading engine.
//!
//! Every type crossing a component boundary lives here: candles, trades,
//! order book snapshots, levels, scan results, signals, positions and
//! orders, plus the shared indicator math. All public types carry explicit
//! serde contracts.

pub mod book;
pub mod candle;
pub mod error;
pub mod indicators;
pub mod level;
pub mod market;
pub mod order;
pub mod position;
pub mod signal;
pub mod symbol;
pub mod trade;

pub use book::{BookLevel, L2Depth, OrderBookSnapshot};
pub use candle::Candle;
pub use error::{CoreError, Result};
pub use level::{LevelKind, TradingLevel};
pub use market::{FilterOutcome, MarketData, ScanResult};
pub use order::{
    round_price_to_tick, round_qty_to_step, Order, OrderStatus, OrderType,
};
pub use position::{
    validate_tp_ladder, FsmState, PlacementMode, Position, PositionStatus, TpLevel,
};
pub use signal::{Side, Signal, Strategy};
pub use symbol::Symbol;
pub use trade::{Trade, TradeSide};
