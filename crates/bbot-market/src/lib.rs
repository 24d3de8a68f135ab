//! Market data aggregation: rolling trade windows and order books.

pub mod book;
pub mod error;
pub mod trades;

pub use book::{ApplyOutcome, OrderBookManager};
pub use error::{MarketError, MarketResult};
pub use trades::{TradeMetrics, TradesAggregator};
