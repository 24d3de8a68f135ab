//! Process resource sampling.
//!
//! Samples CPU and memory for the engine's adaptive pacing. Soft
//! breaches trigger an optimisation pass (cache clears, window
//! compaction); sustained hard breaches demote the engine to PAUSED.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::metrics::RESOURCE_USAGE;

/// Pressure classification for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceLevel {
    Normal,
    /// Above soft thresholds. Trigger an optimisation pass.
    Soft,
    /// Above hard thresholds. Log critical, consider pausing.
    Hard,
}

/// One resource sample.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_pct: f32,
    pub rss_bytes: u64,
    /// RSS as a percentage of the configured memory cap.
    pub rss_pct: f32,
    pub level: ResourceLevel,
}

/// Thresholds and sampling cadence.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Memory cap the percentages are computed against, in bytes.
    pub memory_cap_bytes: u64,
    pub soft_rss_pct: f32,
    pub hard_rss_pct: f32,
    pub soft_cpu_pct: f32,
    pub hard_cpu_pct: f32,
    /// Minimum interval between real samples; calls in between reuse
    /// the previous one.
    pub sample_interval: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_cap_bytes: 2 * 1024 * 1024 * 1024,
            soft_rss_pct: 70.0,
            hard_rss_pct: 90.0,
            soft_cpu_pct: 80.0,
            hard_cpu_pct: 95.0,
            sample_interval: Duration::from_secs(60),
        }
    }
}

struct MonitorState {
    sys: System,
    last_sample_at: Option<Instant>,
    last: Option<ResourceSnapshot>,
    consecutive_hard: u32,
}

/// Samples the current process through sysinfo.
pub struct ResourceMonitor {
    pid: Pid,
    limits: ResourceLimits,
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            limits,
            state: Mutex::new(MonitorState {
                sys: System::new(),
                last_sample_at: None,
                last: None,
                consecutive_hard: 0,
            }),
        }
    }

    /// Take (or reuse) a sample and classify it.
    pub fn sample(&self) -> ResourceSnapshot {
        let mut state = self.state.lock();

        let fresh_needed = state
            .last_sample_at
            .map(|t| t.elapsed() >= self.limits.sample_interval)
            .unwrap_or(true);

        if !fresh_needed {
            if let Some(snap) = state.last {
                return snap;
            }
        }

        state.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        let (cpu_pct, rss_bytes) = state
            .sys
            .process(self.pid)
            .map(|p| (p.cpu_usage(), p.memory()))
            .unwrap_or((0.0, 0));

        let rss_pct = if self.limits.memory_cap_bytes > 0 {
            (rss_bytes as f64 / self.limits.memory_cap_bytes as f64 * 100.0) as f32
        } else {
            0.0
        };

        let level = if rss_pct >= self.limits.hard_rss_pct || cpu_pct >= self.limits.hard_cpu_pct {
            ResourceLevel::Hard
        } else if rss_pct >= self.limits.soft_rss_pct || cpu_pct >= self.limits.soft_cpu_pct {
            ResourceLevel::Soft
        } else {
            ResourceLevel::Normal
        };

        match level {
            ResourceLevel::Hard => {
                state.consecutive_hard += 1;
                warn!(cpu_pct, rss_bytes, rss_pct, "Hard resource threshold breached");
            }
            _ => {
                state.consecutive_hard = 0;
                debug!(cpu_pct, rss_bytes, rss_pct, "Resource sample");
            }
        }

        RESOURCE_USAGE.with_label_values(&["cpu_pct"]).set(cpu_pct as f64);
        RESOURCE_USAGE
            .with_label_values(&["rss_bytes"])
            .set(rss_bytes as f64);
        RESOURCE_USAGE.with_label_values(&["rss_pct"]).set(rss_pct as f64);

        let snap = ResourceSnapshot {
            cpu_pct,
            rss_bytes,
            rss_pct,
            level,
        };
        state.last = Some(snap);
        state.last_sample_at = Some(Instant::now());
        snap
    }

    /// Number of consecutive hard-level samples.
    pub fn consecutive_hard(&self) -> u32 {
        self.state.lock().consecutive_hard
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_classifies_against_cap() {
        // A huge cap keeps the sample in the normal band.
        let monitor = ResourceMonitor::new(ResourceLimits {
            memory_cap_bytes: u64::MAX,
            ..Default::default()
        });
        let snap = monitor.sample();
        assert_eq!(snap.level, ResourceLevel::Normal);
    }

    #[test]
    fn test_sample_is_cached_within_interval() {
        let monitor = ResourceMonitor::new(ResourceLimits::default());
        let a = monitor.sample();
        let b = monitor.sample();
        assert_eq!(a.rss_bytes, b.rss_bytes);
    }
}
