//! Engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Preset error: {0}")]
    Preset(String),

    #[error("Venue error: {0}")]
    Venue(#[from] bbot_venue::VenueError),

    #[error("Core error: {0}")]
    Core(#[from] bbot_core::CoreError),

    #[error("Diagnostics error: {0}")]
    Diag(#[from] bbot_diag::DiagError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
