//! Structured diagnostics events.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use bbot_core::Symbol;

/// One append-only diagnostics record.
///
/// Consumers aggregate by `reason` and by `(stage, passed)`, so both stay
/// short machine-readable strings; prose belongs in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagEvent {
    /// Wall-clock timestamp in milliseconds.
    pub ts: i64,
    /// Emitting component, e.g. "scanner", "signal", "engine".
    pub component: String,
    /// Pipeline stage within the component, e.g. "filter", "predicate".
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

impl DiagEvent {
    pub fn new(component: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            ts: Utc::now().timestamp_millis(),
            component: component.into(),
            stage: stage.into(),
            symbol: None,
            payload: Map::new(),
            reason: None,
            passed: None,
        }
    }

    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_passed(mut self, passed: bool) -> Self {
        self.passed = Some(passed);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialises_without_empty_options() {
        let event = DiagEvent::new("scanner", "filter")
            .with_passed(false)
            .with_reason("filter:min_trades_per_minute");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reason\""));
        assert!(!json.contains("\"symbol\""));
    }

    #[test]
    fn test_event_round_trip() {
        let event = DiagEvent::new("signal", "predicate")
            .with_symbol(Symbol::new("BTCUSDT"))
            .with_field("value", 0.6)
            .with_passed(true);
        let json = serde_json::to_string(&event).unwrap();
        let back: DiagEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
