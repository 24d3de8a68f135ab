//! Risk error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sizing failed: {0}")]
    Sizing(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
