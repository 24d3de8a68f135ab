//! Engine crate: preset loading, the top-level state machine, command
//! handling and the live data feed.

pub mod commands;
pub mod engine;
pub mod error;
pub mod feed;
pub mod health;
pub mod preset;
pub mod state;

pub use commands::{command_channel, Command, CommandKind, CommandReceiver, CommandResult, CommandSender};
pub use engine::{AdaptiveDelay, Engine};
pub use error::{EngineError, EngineResult};
pub use feed::{run_stream_router, MarketDataFeed};
pub use health::HealthReport;
pub use preset::{ExecutionConfig, Preset};
pub use state::EngineState;
