//! Market data error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
}

pub type MarketResult<T> = Result<T, MarketError>;
