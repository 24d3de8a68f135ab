//! Venue error taxonomy.
//!
//! Every failure from the venue is classified so callers can decide
//! between retry, surface and drop without string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VenueError {
    /// Token bucket empty and the caller declined to wait.
    #[error("Rate limit exceeded for endpoint {endpoint}")]
    RateLimitExceeded { endpoint: String },

    /// Transport-level failure. Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out. Retryable.
    #[error("Timeout after {0} ms")]
    Timeout(u64),

    /// Credentials rejected. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The venue rejected the request shape. Never retried.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Venue returned an error payload we do not classify further.
    #[error("Venue error {code}: {message}")]
    Exchange { code: i64, message: String },

    /// Payload did not match the wire contract.
    #[error("Parse error: {0}")]
    Parse(String),

    /// WebSocket closed by peer.
    #[error("WebSocket closed: code {code}, {reason}")]
    WsClosed { code: u16, reason: String },

    /// Internal channel receiver dropped.
    #[error("Event channel closed")]
    ChannelClosed,

    /// Paper exchange refused the order.
    #[error("Simulated order rejected: {0}")]
    PaperRejected(String),
}

impl VenueError {
    /// Whether an automatic retry is appropriate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::WsClosed { .. }
        )
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if e.is_status() {
            let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
            match status {
                401 | 403 => Self::Auth(e.to_string()),
                400 | 404 | 422 => Self::BadRequest(e.to_string()),
                429 => Self::RateLimitExceeded {
                    endpoint: "http".to_string(),
                },
                _ => Self::Network(e.to_string()),
            }
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VenueError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for VenueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type VenueResult<T> = Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(VenueError::Network("reset".into()).is_retryable());
        assert!(VenueError::Timeout(5000).is_retryable());
        assert!(!VenueError::Auth("bad key".into()).is_retryable());
        assert!(!VenueError::BadRequest("qty".into()).is_retryable());
        assert!(!VenueError::RateLimitExceeded {
            endpoint: "kline".into()
        }
        .is_retryable());
    }
}
