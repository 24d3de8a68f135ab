//! Engine health snapshot.

use serde::{Deserialize, Serialize};

/// Snapshot returned to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: String,
    pub kill_switch_active: bool,
    pub last_error: Option<String>,
    pub open_positions: usize,
    pub uptime_secs: u64,
    pub session_id: String,
}
