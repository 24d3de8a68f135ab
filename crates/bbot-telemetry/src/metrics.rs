//! Prometheus metrics for the trading engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means duplicate metric names, which is a build-time defect
//! that should crash at startup, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_gauge, CounterVec, Gauge, GaugeVec, HistogramVec, IntGauge,
};

/// WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("bbot_ws_connected", "WebSocket connection state (1=connected)").unwrap()
});

/// Total WebSocket reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bbot_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Engine state machine current state (1 = active).
pub static ENGINE_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "bbot_engine_state",
        "Engine state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Scan cycle duration in milliseconds.
pub static SCAN_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bbot_scan_duration_ms",
        "Market scan duration in milliseconds",
        &["outcome"],
        vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

/// Scan candidates that passed all filters.
pub static SCAN_CANDIDATES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "bbot_scan_candidates",
        "Candidates passing all filters in the last scan"
    )
    .unwrap()
});

/// Total signals generated per strategy and side.
pub static SIGNALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bbot_signals_total",
        "Total entry signals generated",
        &["strategy", "side"]
    )
    .unwrap()
});

/// Total risk gate rejections by gate name.
pub static RISK_REJECTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bbot_risk_rejects_total",
        "Total signals rejected by the risk manager",
        &["gate"]
    )
    .unwrap()
});

/// Currently open positions.
pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("bbot_open_positions", "Currently open positions").unwrap()
});

/// Realised PnL for the current session, in USD.
pub static SESSION_PNL_USD: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("bbot_session_pnl_usd", "Realised session PnL in USD").unwrap()
});

/// Kill switch state (1 = latched).
pub static KILL_SWITCH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("bbot_kill_switch", "Kill switch latched (1=yes)").unwrap()
});

/// Density events by type.
pub static DENSITY_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bbot_density_events_total",
        "Order book density events",
        &["event"]
    )
    .unwrap()
});

/// Process resource usage as sampled by the resource monitor.
pub static RESOURCE_USAGE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "bbot_resource_usage",
        "Process resource usage (cpu_pct, rss_bytes, rss_pct)",
        &["kind"]
    )
    .unwrap()
});
