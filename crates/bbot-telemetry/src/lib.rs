//! Observability for the trading engine.
//!
//! - Structured logging through tracing (JSON in production)
//! - Prometheus metrics statics
//! - Process resource sampling for adaptive pacing

pub mod error;
pub mod logging;
pub mod metrics;
pub mod resource;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use resource::{ResourceLevel, ResourceLimits, ResourceMonitor, ResourceSnapshot};
