//! Top-level engine states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Initializing,
    Scanning,
    LevelBuilding,
    SignalWait,
    Sizing,
    Execution,
    Managing,
    Paused,
    Error,
    Emergency,
}

impl EngineState {
    /// Whether a direct transition is part of the designed flow.
    ///
    /// Pause and emergency are reachable from anywhere and are not
    /// listed per state.
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;
        if matches!(next, Paused | Emergency | Error) {
            return true;
        }
        matches!(
            (self, next),
            (Initializing, Scanning)
                | (Scanning, Scanning)
                | (Scanning, LevelBuilding)
                | (LevelBuilding, SignalWait)
                | (SignalWait, Sizing)
                | (SignalWait, Scanning)
                | (Sizing, Execution)
                | (Sizing, Scanning)
                | (Execution, Managing)
                | (Execution, Scanning)
                | (Managing, Managing)
                | (Managing, Scanning)
                | (Error, Scanning)
                | (Paused, _)
                | (Emergency, Scanning)
        )
    }

    pub fn is_trading_active(&self) -> bool {
        !matches!(self, Self::Paused | Self::Error | Self::Emergency)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "INITIALIZING",
            Self::Scanning => "SCANNING",
            Self::LevelBuilding => "LEVEL_BUILDING",
            Self::SignalWait => "SIGNAL_WAIT",
            Self::Sizing => "SIZING",
            Self::Execution => "EXECUTION",
            Self::Managing => "MANAGING",
            Self::Paused => "PAUSED",
            Self::Error => "ERROR",
            Self::Emergency => "EMERGENCY",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_designed_flow_is_allowed() {
        use EngineState::*;
        let flow = [
            Initializing,
            Scanning,
            LevelBuilding,
            SignalWait,
            Sizing,
            Execution,
            Managing,
            Scanning,
        ];
        for pair in flow.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_rejected_jumps() {
        use EngineState::*;
        assert!(!Scanning.can_transition_to(Execution));
        assert!(!Initializing.can_transition_to(Managing));
    }

    #[test]
    fn test_emergency_reachable_from_anywhere() {
        use EngineState::*;
        for state in [Scanning, Sizing, Managing, Paused] {
            assert!(state.can_transition_to(Emergency));
        }
    }
}
