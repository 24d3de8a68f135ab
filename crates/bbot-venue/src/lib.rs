//! Venue adapter: REST, WebSocket streams, rate limiting and the paper
//! trading exchange.
//!
//! The rest of the engine never sees venue field names; everything is
//! normalised to the core model at this boundary.

pub mod error;
pub mod execution;
pub mod messages;
pub mod paper;
pub mod rate_limit;
pub mod rest;
pub mod ws;

pub use error::{VenueError, VenueResult};
pub use execution::{AccountBalance, BoxFuture, ExecutionClient, OrderRequest};
pub use messages::{book_topic, parse_frame, trade_topic, BookMessage, WsEvent};
pub use paper::{PaperConfig, PaperExchange};
pub use rate_limit::RateLimiter;
pub use rest::{MarketMeta, RestClient, RestConfig, TickerInfo};
pub use ws::{WsClient, WsConfig, WsHandle, WsState};
