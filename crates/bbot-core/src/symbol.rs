//! Market symbol identification.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Venue symbol for a perpetual contract (e.g., "BTCUSDT").
///
/// Wraps the venue's string identifier to prevent mixing symbols with
/// other string-typed values in map keys and function signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quote currency heuristic for USDT-margined perpetuals.
    pub fn is_usdt_perp(&self) -> bool {
        self.0.ends_with("USDT")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidSymbol(s.to_string()));
        }
        Ok(Self(s.to_uppercase()))
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_parse_uppercases() {
        let sym: Symbol = "btcusdt".parse().unwrap();
        assert_eq!(sym.as_str(), "BTCUSDT");
        assert!(sym.is_usdt_perp());
    }

    #[test]
    fn test_symbol_rejects_empty_and_punctuated() {
        assert!("".parse::<Symbol>().is_err());
        assert!("BTC-USDT".parse::<Symbol>().is_err());
    }
}
