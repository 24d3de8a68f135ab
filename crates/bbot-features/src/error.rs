//! Feature layer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type FeatureResult<T> = Result<T, FeatureError>;
