//! Diagnostics error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Sink closed")]
    SinkClosed,
}

pub type DiagResult<T> = Result<T, DiagError>;
