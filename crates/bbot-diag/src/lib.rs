//! Structured diagnostics for the trading engine.
//!
//! Every filter decision, predicate evaluation and state transition is
//! recorded as a JSON-lines event keyed by session id. The sink is
//! bounded and lossy under pressure; the hot path never blocks on disk.

pub mod error;
pub mod event;
pub mod sink;

pub use error::{DiagError, DiagResult};
pub use event::DiagEvent;
pub use sink::{DiagCounters, DiagSink, DiagWriter};
