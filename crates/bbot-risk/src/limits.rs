//! Risk gates and the kill switch.
//!
//! All entry gating runs through `evaluate_signal_risk`; the engine
//! calls `check_risk_limits` every cycle. The kill switch latches: once
//! tripped it refuses every new entry until an operator retry resets it,
//! and it demands a flat book.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bbot_core::{CoreError, Position, Signal};

use crate::sizing::{size_position, SizeResult, SizingInputs};

/// Risk configuration from the preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade, in (0, 1).
    pub risk_per_trade: f64,
    pub max_concurrent_positions: usize,
    /// Daily realised loss fraction that blocks new entries.
    pub daily_risk_limit: f64,
    /// Session loss fraction that latches the kill switch.
    pub kill_switch_loss_limit: f64,
    /// Maximum |BTC correlation| allowed for the open basket.
    pub correlation_limit: f64,
    pub max_position_size_usd: f64,
    /// Fraction of aggregated depth a position may take.
    #[serde(default = "default_max_depth_fraction")]
    pub max_depth_fraction: f64,
}

fn default_max_depth_fraction() -> f64 {
    0.1
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
            max_concurrent_positions: 3,
            daily_risk_limit: 0.03,
            kill_switch_loss_limit: 0.05,
            correlation_limit: 0.7,
            max_position_size_usd: 50_000.0,
            max_depth_fraction: 0.1,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..1.0).contains(&self.risk_per_trade) || self.risk_per_trade == 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "risk_per_trade must be in (0, 1), got {}",
                self.risk_per_trade
            )));
        }
        for (name, value) in [
            ("daily_risk_limit", self.daily_risk_limit),
            ("kill_switch_loss_limit", self.kill_switch_loss_limit),
            ("correlation_limit", self.correlation_limit),
            ("max_position_size_usd", self.max_position_size_usd),
            ("max_depth_fraction", self.max_depth_fraction),
        ] {
            if value < 0.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if self.max_concurrent_positions == 0 {
            return Err(CoreError::InvalidConfig(
                "max_concurrent_positions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of gating one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskDecision {
    pub approved: bool,
    pub position_size: Option<SizeResult>,
    pub reason: String,
    /// Gate that rejected, when not approved.
    pub gate: Option<&'static str>,
}

impl RiskDecision {
    fn rejected(gate: &'static str, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            position_size: None,
            reason: reason.into(),
            gate: Some(gate),
        }
    }
}

/// Per-cycle risk status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskStatus {
    Healthy,
    /// Daily loss approaching a limit.
    Warning,
    /// Kill switch latched; flat-all demanded.
    Critical,
}

/// Output of the per-cycle check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLimitsReport {
    pub kill_switch_triggered: bool,
    pub overall_status: RiskStatus,
    pub daily_pnl_usd: f64,
    /// Realised PnL today in R units.
    pub daily_pnl_r: f64,
}

#[derive(Debug)]
struct RiskState {
    kill_switch_active: bool,
    session_start_equity: f64,
    daily_realized_usd: f64,
    daily_realized_r: f64,
    day: u32,
}

/// The risk manager. Counters are only mutated from the engine's main
/// task; the lock is for the occasional cross-task read.
pub struct RiskManager {
    config: RiskConfig,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, session_start_equity: f64) -> Self {
        Self {
            config,
            state: Mutex::new(RiskState {
                kill_switch_active: false,
                session_start_equity,
                daily_realized_usd: 0.0,
                daily_realized_r: 0.0,
                day: Utc::now().ordinal(),
            }),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn kill_switch_active(&self) -> bool {
        self.state.lock().kill_switch_active
    }

    pub fn daily_pnl_usd(&self) -> f64 {
        self.state.lock().daily_realized_usd
    }

    pub fn daily_pnl_r(&self) -> f64 {
        self.state.lock().daily_realized_r
    }

    /// The daily loss budget expressed in R units.
    ///
    /// Each full-budget trade risks `risk_per_trade` of equity, so a
    /// daily limit of `daily_risk_limit` equals this many 1R losses.
    fn daily_cap_r(&self) -> f64 {
        if self.config.risk_per_trade <= 0.0 {
            return 0.0;
        }
        self.config.daily_risk_limit / self.config.risk_per_trade
    }

    /// Accumulate realised PnL from a closed or partially closed trade.
    pub fn record_realized(&self, pnl_usd: f64, pnl_r: f64) {
        let mut state = self.state.lock();
        state.daily_realized_usd += pnl_usd;
        state.daily_realized_r += pnl_r;
    }

    /// Evaluate every gate for one signal and size it when approved.
    ///
    /// `basket_correlations` are the BTC correlations of currently open
    /// positions; `candidate_correlation` is the signal market's.
    pub fn evaluate_signal_risk(
        &self,
        signal: &Signal,
        equity_usd: f64,
        open_positions: &[Position],
        candidate_correlation: f64,
        basket_correlations: &[f64],
        depth_usd: Option<f64>,
        qty_step: f64,
    ) -> RiskDecision {
        let state = self.state.lock();

        if state.kill_switch_active {
            return RiskDecision::rejected("kill_switch", "kill switch is latched");
        }

        if open_positions.len() >= self.config.max_concurrent_positions {
            return RiskDecision::rejected(
                "concurrent_cap",
                format!(
                    "open positions {} at cap {}",
                    open_positions.len(),
                    self.config.max_concurrent_positions
                ),
            );
        }

        // Correlation of the basket including the candidate.
        let mut corrs: Vec<f64> = basket_correlations.to_vec();
        corrs.push(candidate_correlation);
        let mean_abs_corr = corrs.iter().map(|c| c.abs()).sum::<f64>() / corrs.len() as f64;
        if mean_abs_corr > self.config.correlation_limit {
            return RiskDecision::rejected(
                "correlation_cap",
                format!(
                    "basket |correlation| {:.2} exceeds {:.2}",
                    mean_abs_corr, self.config.correlation_limit
                ),
            );
        }

        // The daily budget is checked both ways: in USD against current
        // equity, and in R units so the gate holds even when equity has
        // drifted since the losses were realised.
        let daily_cap_usd = self.config.daily_risk_limit * equity_usd;
        if state.daily_realized_usd <= -daily_cap_usd && daily_cap_usd > 0.0 {
            return RiskDecision::rejected(
                "daily_risk_cap",
                format!(
                    "daily loss {:.0} USD at cap {:.0}",
                    state.daily_realized_usd, -daily_cap_usd
                ),
            );
        }
        let daily_cap_r = self.daily_cap_r();
        if state.daily_realized_r <= -daily_cap_r && daily_cap_r > 0.0 {
            return RiskDecision::rejected(
                "daily_risk_cap",
                format!(
                    "daily loss {:.1}R at cap {:.1}R",
                    state.daily_realized_r, -daily_cap_r
                ),
            );
        }
        drop(state);

        let size = size_position(
            signal.entry,
            signal.sl,
            SizingInputs {
                equity_usd,
                risk_per_trade: self.config.risk_per_trade,
                max_position_size_usd: self.config.max_position_size_usd,
                depth_usd,
                max_depth_fraction: self.config.max_depth_fraction,
                qty_step,
            },
        );

        if !size.is_valid {
            return RiskDecision::rejected("sizing", size.reason);
        }

        RiskDecision {
            approved: true,
            reason: size.reason.clone(),
            position_size: Some(size),
            gate: None,
        }
    }

    /// Per-cycle check: rolls the day counter, trips the kill switch on
    /// a session loss beyond the limit.
    pub fn check_risk_limits(&self, now: DateTime<Utc>) -> RiskLimitsReport {
        let mut state = self.state.lock();

        if now.ordinal() != state.day {
            info!("New trading day, resetting daily counters");
            state.day = now.ordinal();
            state.daily_realized_usd = 0.0;
            state.daily_realized_r = 0.0;
        }

        let loss_limit_usd = self.config.kill_switch_loss_limit * state.session_start_equity;
        let mut triggered = false;
        if !state.kill_switch_active
            && loss_limit_usd > 0.0
            && state.daily_realized_usd <= -loss_limit_usd
        {
            warn!(
                daily_pnl = state.daily_realized_usd,
                limit = -loss_limit_usd,
                "Kill switch latched"
            );
            state.kill_switch_active = true;
            triggered = true;
        }

        let overall_status = if state.kill_switch_active {
            RiskStatus::Critical
        } else if state.daily_realized_usd
            <= -0.5 * self.config.daily_risk_limit * state.session_start_equity
        {
            RiskStatus::Warning
        } else {
            RiskStatus::Healthy
        };

        RiskLimitsReport {
            kill_switch_triggered: triggered,
            overall_status,
            daily_pnl_usd: state.daily_realized_usd,
            daily_pnl_r: state.daily_realized_r,
        }
    }

    /// Latch the kill switch on operator command.
    pub fn latch_kill_switch(&self) {
        let mut state = self.state.lock();
        if !state.kill_switch_active {
            warn!("Kill switch latched by operator command");
            state.kill_switch_active = true;
        }
    }

    /// Operator acknowledgement: unlatch the kill switch.
    pub fn reset_kill_switch(&self) {
        let mut state = self.state.lock();
        if state.kill_switch_active {
            info!("Kill switch reset by operator");
            state.kill_switch_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::{Side, Strategy, Symbol};
    use std::collections::BTreeMap;

    fn signal() -> Signal {
        Signal {
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            strategy: Strategy::Momentum,
            reason: "test".into(),
            entry: 100.0,
            level: 99.9,
            sl: 99.0,
            tp1: None,
            tp2: None,
            confidence: 0.8,
            ts_ms: 0,
            meta: BTreeMap::new(),
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default(), 20_000.0)
    }

    #[test]
    fn test_approval_sizes_position() {
        let m = manager();
        let decision = m.evaluate_signal_risk(&signal(), 20_000.0, &[], 0.2, &[], None, 0.0);
        assert!(decision.approved);
        let size = decision.position_size.unwrap();
        assert!((size.quantity - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_kill_switch_latches_and_blocks() {
        let m = manager();
        // Session equity 20k, limit 5%: a 1200 USD loss trips it.
        m.record_realized(-1_200.0, -6.0);
        let report = m.check_risk_limits(Utc::now());
        assert!(report.kill_switch_triggered);
        assert_eq!(report.overall_status, RiskStatus::Critical);

        let decision = m.evaluate_signal_risk(&signal(), 20_000.0, &[], 0.0, &[], None, 0.0);
        assert!(!decision.approved);
        assert_eq!(decision.gate, Some("kill_switch"));

        // Latching: a later profitable day does not unlatch by itself.
        m.record_realized(2_000.0, 10.0);
        let report = m.check_risk_limits(Utc::now());
        assert!(!report.kill_switch_triggered);
        assert_eq!(report.overall_status, RiskStatus::Critical);

        // Operator retry resets it.
        m.reset_kill_switch();
        let decision = m.evaluate_signal_risk(&signal(), 20_000.0, &[], 0.0, &[], None, 0.0);
        assert!(decision.approved);
    }

    #[test]
    fn test_concurrent_cap_blocks() {
        let m = RiskManager::new(
            RiskConfig {
                max_concurrent_positions: 1,
                ..Default::default()
            },
            20_000.0,
        );
        let open = vec![Position {
            id: "p".into(),
            symbol: Symbol::new("ETHUSDT"),
            side: Side::Long,
            strategy: Strategy::Momentum,
            qty: 1.0,
            entry: 100.0,
            sl: 99.0,
            tp_levels: vec![],
            status: bbot_core::PositionStatus::Open,
            realized_pnl_usd: 0.0,
            unrealized_pnl_r: 0.0,
            highest_seen: 100.0,
            lowest_seen: 100.0,
            breakout_level: 99.5,
            opened_at_ms: 0,
            closed_at_ms: None,
            fsm_state: bbot_core::FsmState::Running,
        }];
        let decision = m.evaluate_signal_risk(&signal(), 20_000.0, &open, 0.0, &[0.1], None, 0.0);
        assert!(!decision.approved);
        assert_eq!(decision.gate, Some("concurrent_cap"));
    }

    #[test]
    fn test_correlation_cap_blocks() {
        let m = manager();
        let decision =
            m.evaluate_signal_risk(&signal(), 20_000.0, &[], 0.95, &[0.8, 0.9], None, 0.0);
        assert!(!decision.approved);
        assert_eq!(decision.gate, Some("correlation_cap"));
    }

    #[test]
    fn test_daily_risk_cap_blocks_without_kill_switch() {
        let m = manager();
        // 3% of 20k is 600; lose 700 but stay under the 1000 kill level.
        m.record_realized(-700.0, -3.5);
        let report = m.check_risk_limits(Utc::now());
        assert!(!report.kill_switch_triggered);
        assert!((report.daily_pnl_r + 3.5).abs() < 1e-9);

        let decision = m.evaluate_signal_risk(&signal(), 20_000.0, &[], 0.0, &[], None, 0.0);
        assert!(!decision.approved);
        assert_eq!(decision.gate, Some("daily_risk_cap"));
    }

    #[test]
    fn test_daily_risk_cap_in_r_units() {
        let m = manager();
        // Budget is 3% daily at 1% per trade: three full-R losses. Four
        // losing R on thin USD damage must still close the gate.
        m.record_realized(-100.0, -4.0);
        assert!((m.daily_pnl_r() + 4.0).abs() < 1e-9);

        let decision = m.evaluate_signal_risk(&signal(), 20_000.0, &[], 0.0, &[], None, 0.0);
        assert!(!decision.approved);
        assert_eq!(decision.gate, Some("daily_risk_cap"));
        assert!(decision.reason.contains('R'));
    }
}
