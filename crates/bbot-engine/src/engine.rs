//! The engine: the top-level state machine tying every component
//! together.
//!
//! One cooperative cycle advances the machine one step:
//! SCANNING finds candidates, LEVEL_BUILDING publishes their levels,
//! SIGNAL_WAIT consults the strategies, SIZING runs the risk gates,
//! EXECUTION validates and opens, MANAGING drives open positions.
//! PAUSED, ERROR and EMERGENCY branch off from anywhere. The cycle
//! never blocks the venue stream consumers; everything here works on
//! snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use bbot_core::{MarketData, ScanResult, Signal, Symbol};
use bbot_diag::{DiagEvent, DiagSink};
use bbot_features::{
    ActivityConfig, ActivitySample, ActivityTracker, BookSide, DensityDetector,
};
use bbot_market::{OrderBookManager, TradesAggregator};
use bbot_position::{
    BarUpdate, EntryContext, EntryValidator, PlacementContext, PositionEvent, PositionManager,
};
use bbot_risk::{RiskManager, SizeResult};
use bbot_scanner::Scanner;
use bbot_signal::{BreakoutHistory, SignalGenerator, SymbolFeatures};
use bbot_telemetry::{metrics, ResourceLevel, ResourceLimits, ResourceMonitor};
use bbot_venue::{ExecutionClient, MarketMeta};

use crate::commands::{Command, CommandKind, CommandReceiver, CommandResult};
use crate::error::EngineResult;
use crate::health::HealthReport;
use crate::preset::Preset;
use crate::state::EngineState;

/// Consecutive hard resource breaches that demote the engine to PAUSED.
const SUSTAINED_HARD_BREACHES: u32 = 3;

/// Error-state retries before the engine stays down for the operator.
const MAX_ERROR_RETRIES: u32 = 5;

/// Adaptive cycle pacing: shrinks when cycles run fast, grows under
/// resource pressure.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl AdaptiveDelay {
    pub fn new(initial: Duration, min: Duration, max: Duration) -> Self {
        Self {
            current: initial.clamp(min, max),
            min,
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Adjust after one cycle.
    pub fn tune(&mut self, cycle_elapsed: Duration, pressure: ResourceLevel) {
        let next = match pressure {
            ResourceLevel::Hard => self.current.mul_f64(2.0),
            ResourceLevel::Soft => self.current.mul_f64(1.5),
            ResourceLevel::Normal => {
                if cycle_elapsed < self.current / 4 {
                    self.current.mul_f64(0.9)
                } else {
                    self.current
                }
            }
        };
        self.current = next.clamp(self.min, self.max);
    }
}

/// The trading engine.
pub struct Engine {
    preset: Preset,
    state: EngineState,
    /// Where resume returns to after a pause.
    resume_state: EngineState,
    session_id: String,
    started_at: Instant,

    scanner: Arc<Scanner>,
    generator: SignalGenerator,
    risk: RiskManager,
    positions: Arc<PositionManager>,
    trades: Arc<TradesAggregator>,
    books: Arc<OrderBookManager>,
    density: Mutex<DensityDetector>,
    activity: Mutex<ActivityTracker>,
    entry_validator: EntryValidator,
    executor: Arc<dyn ExecutionClient>,
    resources: ResourceMonitor,
    diag: DiagSink,
    commands: CommandReceiver,

    pacing: AdaptiveDelay,
    /// Venue precision metadata per symbol.
    market_meta: HashMap<Symbol, MarketMeta>,

    pending_scan: Vec<ScanResult>,
    pending_signal: Option<Signal>,
    pending_size: Option<SizeResult>,
    last_error: Option<String>,
    error_retries: u32,
    stop_requested: bool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preset: Preset,
        executor: Arc<dyn ExecutionClient>,
        trades: Arc<TradesAggregator>,
        books: Arc<OrderBookManager>,
        diag: DiagSink,
        commands: CommandReceiver,
        session_start_equity: f64,
        resource_limits: ResourceLimits,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string();
        info!(session_id = %session_id, preset = %preset.name, "Engine created");

        // The scanner's correlation gate follows the risk section.
        let mut scanner_settings = preset.scanner_config.clone();
        scanner_settings.correlation_limit = preset.risk.correlation_limit;

        let scanner = Arc::new(Scanner::new(
            scanner_settings,
            preset.liquidity_filters.clone(),
            preset.volatility_filters.clone(),
            preset.levels_rules.clone(),
            diag.clone(),
        ));

        let history = Arc::new(parking_lot::RwLock::new(BreakoutHistory::new()));
        let mut signal_config = preset.signal_config.clone();
        signal_config.strategy_priority = preset.strategy_priority;
        let generator = SignalGenerator::new(signal_config, history.clone(), diag.clone());

        let risk = RiskManager::new(preset.risk.clone(), session_start_equity);

        let positions = Arc::new(PositionManager::new(
            preset.position_config.clone(),
            preset.fsm.clone(),
            preset.exit_rules.clone(),
            executor.clone(),
            history,
            diag.clone(),
        ));

        let entry_validator =
            EntryValidator::new(preset.entry_rules.clone(), preset.market_quality.clone());

        let density = Mutex::new(DensityDetector::new(preset.density_config.clone()));
        let activity = Mutex::new(ActivityTracker::new(ActivityConfig::default()));

        let base_delay = Duration::from_secs(preset.scanner_config.scan_interval_seconds.max(1));
        Self {
            preset,
            state: EngineState::Initializing,
            resume_state: EngineState::Scanning,
            session_id,
            started_at: Instant::now(),
            scanner,
            generator,
            risk,
            positions,
            trades,
            books,
            density,
            activity,
            entry_validator,
            executor,
            resources: ResourceMonitor::new(resource_limits),
            diag,
            commands,
            pacing: AdaptiveDelay::new(base_delay, Duration::from_secs(1), Duration::from_secs(300)),
            market_meta: HashMap::new(),
            pending_scan: Vec::new(),
            pending_signal: None,
            pending_size: None,
            last_error: None,
            error_retries: 0,
            stop_requested: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn cycle_delay(&self) -> Duration {
        self.pacing.current()
    }

    pub fn set_market_meta(&mut self, meta: Vec<MarketMeta>) {
        self.market_meta = meta.into_iter().map(|m| (m.symbol.clone(), m)).collect();
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            state: self.state.to_string(),
            kill_switch_active: self.risk.kill_switch_active(),
            last_error: self.last_error.clone(),
            open_positions: self.positions.open_count(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            session_id: self.session_id.clone(),
        }
    }

    /// Density detector handle, for wiring stream updates.
    pub fn density(&self) -> &Mutex<DensityDetector> {
        &self.density
    }

    /// Advance the machine one step over the given universe snapshot.
    ///
    /// Exceptions inside the step surface here; the caller converts
    /// them to the ERROR state.
    pub async fn run_cycle(
        &mut self,
        universe: Vec<MarketData>,
        btc_data: Option<MarketData>,
    ) -> EngineResult<()> {
        let cycle_start = Instant::now();

        self.process_commands().await;
        if self.stop_requested {
            return Ok(());
        }

        // Risk limits are checked every cycle regardless of state.
        let report = self.risk.check_risk_limits(Utc::now());
        metrics::SESSION_PNL_USD.set(report.daily_pnl_usd);
        if report.kill_switch_triggered {
            self.enter_emergency("kill switch tripped").await;
        }

        let snapshot = self.resources.sample();
        if snapshot.level != ResourceLevel::Normal {
            self.optimisation_pass();
            if self.resources.consecutive_hard() >= SUSTAINED_HARD_BREACHES
                && self.state != EngineState::Paused
            {
                warn!("Sustained hard resource pressure, pausing");
                self.resume_state = EngineState::Scanning;
                self.transition(EngineState::Paused);
            }
        }

        match self.state {
            EngineState::Initializing => {
                self.transition(EngineState::Scanning);
            }
            EngineState::Scanning => {
                self.step_scanning(universe, btc_data, snapshot.rss_pct).await;
            }
            EngineState::LevelBuilding => {
                // Levels were computed by the scanner for passing rows;
                // this state publishes them and hands over.
                let level_count: usize =
                    self.pending_scan.iter().map(|r| r.levels.len()).sum();
                self.diag.record(
                    DiagEvent::new("engine", "levels")
                        .with_field("count", level_count as i64),
                );
                self.transition(EngineState::SignalWait);
            }
            EngineState::SignalWait => {
                self.step_signal_wait();
            }
            EngineState::Sizing => {
                self.step_sizing().await?;
            }
            EngineState::Execution => {
                self.step_execution().await?;
            }
            EngineState::Managing => {
                self.step_managing(&universe).await;
            }
            EngineState::Paused => {
                // Commands only.
            }
            EngineState::Error => {
                if self.error_retries < MAX_ERROR_RETRIES {
                    self.error_retries += 1;
                    info!(retries = self.error_retries, "Retrying after error");
                    self.transition(EngineState::Scanning);
                }
            }
            EngineState::Emergency => {
                // Refuse all work until operator retry.
            }
        }

        self.pacing.tune(cycle_start.elapsed(), snapshot.level);
        Ok(())
    }

    /// Note a cycle failure and demote to ERROR.
    pub fn note_cycle_error(&mut self, message: String) {
        error!(%message, "Cycle failed");
        self.diag.record(
            DiagEvent::new("engine", "cycle_error").with_reason("error:cycle"),
        );
        self.last_error = Some(message);
        self.transition(EngineState::Error);
    }

    async fn step_scanning(
        &mut self,
        universe: Vec<MarketData>,
        btc_data: Option<MarketData>,
        memory_pct: f32,
    ) {
        self.refresh_densities(&universe);
        let started = Instant::now();
        let results = self.scanner.scan(universe, btc_data, memory_pct).await;
        let passing = results.iter().filter(|r| r.passed_all_filters).count();

        metrics::SCAN_DURATION_MS
            .with_label_values(&[if passing > 0 { "candidates" } else { "empty" }])
            .observe(started.elapsed().as_millis() as f64);
        metrics::SCAN_CANDIDATES.set(passing as i64);

        self.pending_scan = results;
        if passing > 0 {
            self.transition(EngineState::LevelBuilding);
        }
    }

    /// Re-detect liquidity walls from the current books and publish
    /// their lifecycle events.
    fn refresh_densities(&self, universe: &[MarketData]) {
        let mut density = self.density.lock();
        for market in universe {
            let Some(snapshot) = self.books.snapshot(&market.symbol) else {
                continue;
            };
            for event in density.update_tracked(&market.symbol, &snapshot) {
                let kind = match event.kind {
                    bbot_features::DensityEventKind::Detected => "detected",
                    bbot_features::DensityEventKind::Eaten => "eaten",
                    bbot_features::DensityEventKind::Removed => "removed",
                };
                metrics::DENSITY_EVENTS_TOTAL.with_label_values(&[kind]).inc();
                self.diag.record(
                    DiagEvent::new("density", "event")
                        .with_symbol(event.symbol.clone())
                        .with_reason(format!("density:{kind}"))
                        .with_field("price", event.density.price)
                        .with_field("eaten_ratio", event.density.eaten_ratio()),
                );
            }
        }
    }

    fn step_signal_wait(&mut self) {
        // Refresh activity from the latest trade metrics and collect
        // per-symbol features for the strategies.
        let now_ms = Utc::now().timestamp_millis();
        let mut features: HashMap<Symbol, SymbolFeatures> = HashMap::new();
        {
            let mut activity = self.activity.lock();
            for result in self.pending_scan.iter().filter(|r| r.passed_all_filters) {
                let symbol = &result.symbol;
                if let Some(trade_metrics) = self.trades.metrics(symbol) {
                    let updated = activity.update(
                        symbol,
                        ActivitySample {
                            tpm_60s: trade_metrics.tpm_60s,
                            tps_10s: trade_metrics.tps_10s,
                            vol_delta_abs: trade_metrics.vol_delta_60s.abs(),
                        },
                        now_ms,
                    );
                    if updated.is_dropping {
                        self.diag.record(
                            DiagEvent::new("activity", "drop")
                                .with_symbol(symbol.clone())
                                .with_reason("activity:dropping")
                                .with_field("drop_fraction", updated.drop_fraction)
                                .with_field("activity_index", updated.activity_index),
                        );
                    }
                }
                features.insert(
                    symbol.clone(),
                    SymbolFeatures {
                        l2_imbalance: self.books.imbalance(symbol, 50.0),
                        activity_index: activity.activity_index(symbol),
                    },
                );
            }
        }

        let signals = self.generator.generate(&self.pending_scan, &features);
        for signal in &signals {
            metrics::SIGNALS_TOTAL
                .with_label_values(&[
                    signal.strategy.to_string().as_str(),
                    signal.side.to_string().as_str(),
                ])
                .inc();
        }

        match signals.into_iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            Some(best) => {
                self.pending_signal = Some(best);
                self.transition(EngineState::Sizing);
            }
            None => {
                self.transition(EngineState::Scanning);
            }
        }
    }

    async fn step_sizing(&mut self) -> EngineResult<()> {
        let Some(signal) = self.pending_signal.clone() else {
            self.transition(EngineState::Scanning);
            return Ok(());
        };

        let equity = self.executor.fetch_balance().await?.equity_usd;
        let open = self.positions.open_positions();

        let candidate_corr = self
            .pending_scan
            .iter()
            .find(|r| r.symbol == signal.symbol)
            .map(|r| r.market_data.btc_correlation)
            .unwrap_or(0.0);
        let basket: Vec<f64> = open
            .iter()
            .filter_map(|p| {
                self.pending_scan
                    .iter()
                    .find(|r| r.symbol == p.symbol)
                    .map(|r| r.market_data.btc_correlation)
            })
            .collect();

        let depth_usd = self
            .books
            .l2_depth(&signal.symbol)
            .map(|d| d.total_depth_0_5pct());
        let qty_step = self
            .market_meta
            .get(&signal.symbol)
            .map(|m| m.qty_step)
            .unwrap_or(0.0);

        let decision = self.risk.evaluate_signal_risk(
            &signal,
            equity,
            &open,
            candidate_corr,
            &basket,
            depth_usd,
            qty_step,
        );

        if decision.approved {
            self.pending_size = decision.position_size;
            self.transition(EngineState::Execution);
        } else {
            let gate = decision.gate.unwrap_or("unknown");
            metrics::RISK_REJECTS_TOTAL.with_label_values(&[gate]).inc();
            self.diag.record(
                DiagEvent::new("risk", "gate")
                    .with_symbol(signal.symbol.clone())
                    .with_reason(format!("risk:{gate}"))
                    .with_passed(false)
                    .with_field("detail", decision.reason.clone()),
            );
            info!(symbol = %signal.symbol, gate, reason = %decision.reason, "Signal rejected");
            self.pending_signal = None;
            self.transition(EngineState::Scanning);
        }
        Ok(())
    }

    async fn step_execution(&mut self) -> EngineResult<()> {
        let (Some(signal), Some(size)) = (self.pending_signal.take(), self.pending_size.take())
        else {
            self.transition(EngineState::Scanning);
            return Ok(());
        };

        let scan = self
            .pending_scan
            .iter()
            .find(|r| r.symbol == signal.symbol)
            .cloned();
        let candles = scan
            .as_ref()
            .map(|r| r.market_data.candles_5m.clone())
            .unwrap_or_default();

        // Opposing liquidity walls: one lookup at the entry price for
        // the validator, one per fixed target for smart TP placement.
        let r_unit = (signal.entry - signal.sl).abs();
        let (entry_zones, tp_zones) = {
            let density = self.density.lock();
            let opposing_side = match signal.side {
                bbot_core::Side::Long => BookSide::Ask,
                bbot_core::Side::Short => BookSide::Bid,
            };
            let half_width_bps = density.config().bucket_ticks as f64;

            let entry_zones: Vec<(f64, f64)> = density
                .density_at_price(
                    &signal.symbol,
                    signal.entry,
                    opposing_side,
                    self.preset.entry_rules.density_avoidance_bps,
                )
                .map(|wall| zone_around(wall.price, half_width_bps))
                .into_iter()
                .collect();

            // A wall counts against a target when smart placement could
            // be pushed into it: adjustment band plus keep-away buffer.
            let smart = &self.preset.position_config.tp_smart_placement;
            let tp_tolerance_bps = smart.max_adjustment_bps + smart.density_zone_buffer_bps;
            let mut tp_zones: Vec<(f64, f64)> = Vec::new();
            for tp in &self.preset.position_config.tp_levels {
                let target = signal.entry + r_unit * tp.reward_multiple * signal.side.sign();
                if let Some(wall) = density.density_at_price(
                    &signal.symbol,
                    target,
                    opposing_side,
                    tp_tolerance_bps,
                ) {
                    let zone = zone_around(wall.price, half_width_bps);
                    if !tp_zones.contains(&zone) {
                        tp_zones.push(zone);
                    }
                }
            }
            (entry_zones, tp_zones)
        };

        let validation = self.entry_validator.validate(
            &signal,
            &EntryContext {
                candles: candles.clone(),
                opposing_density_zones: entry_zones,
                bars_since_breakout: 1,
            },
        );
        if !validation.valid {
            self.diag.record(
                DiagEvent::new("engine", "entry_validation")
                    .with_symbol(signal.symbol.clone())
                    .with_reason("entry:critical_failure")
                    .with_passed(false),
            );
            info!(symbol = %signal.symbol, "Entry invalidated by pre-entry checks");
            self.transition(EngineState::Scanning);
            return Ok(());
        }

        let placement_ctx = PlacementContext {
            density_zones: tp_zones,
            sr_levels: scan
                .as_ref()
                .map(|r| r.levels.iter().map(|l| l.price).collect())
                .unwrap_or_default(),
            realized_vol_ratio: 1.0,
        };

        // Pre-entry baselines for the activity-drop exit rule.
        let volumes: Vec<f64> = candles.iter().rev().take(20).map(|c| c.volume).collect();
        let avg_volume = (!volumes.is_empty())
            .then(|| volumes.iter().sum::<f64>() / volumes.len() as f64);
        let avg_momentum = momentum_of(&candles);

        match self
            .positions
            .open_position(&signal, size.quantity, &placement_ctx, avg_volume, avg_momentum)
            .await
        {
            Ok(position_id) => {
                metrics::OPEN_POSITIONS.set(self.positions.open_count() as i64);
                self.diag.record(
                    DiagEvent::new("engine", "execution")
                        .with_symbol(signal.symbol.clone())
                        .with_reason("execution:filled")
                        .with_field("position_id", position_id),
                );
                self.transition(EngineState::Managing);
            }
            Err(e) if e.is_retryable() => {
                warn!(?e, "Entry order failed transiently");
                self.transition(EngineState::Scanning);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn step_managing(&mut self, universe: &[MarketData]) {
        let open = self.positions.open_positions();
        for position in &open {
            let Some(market) = universe.iter().find(|m| m.symbol == position.symbol) else {
                continue;
            };
            let Some(last) = market.candles_5m.last() else {
                continue;
            };
            let update = BarUpdate {
                close: last.close,
                volume: last.volume,
                momentum: momentum_of(&market.candles_5m).unwrap_or(0.0),
            };
            let events = self.positions.on_bar(&position.symbol, update).await;
            self.apply_position_events(&events);
        }

        metrics::OPEN_POSITIONS.set(self.positions.open_count() as i64);

        if self.positions.open_count() < self.preset.risk.max_concurrent_positions {
            self.transition(EngineState::Scanning);
        }
    }

    fn apply_position_events(&self, events: &[PositionEvent]) {
        for event in events {
            if let PositionEvent::Closed {
                pnl_usd, pnl_r, reason, ..
            } = event
            {
                self.risk.record_realized(*pnl_usd, *pnl_r);
                info!(reason, pnl_usd, pnl_r, "Realised PnL recorded");
            }
        }
    }

    async fn process_commands(&mut self) {
        for (command, result_tx) in self.commands.drain() {
            let result = self.handle_command(&command).await;
            let _ = result_tx.send(result);
        }
    }

    async fn handle_command(&mut self, command: &Command) -> CommandResult {
        info!(kind = ?command.kind, correlation_id = %command.correlation_id, "Command received");
        self.diag.record(
            DiagEvent::new("engine", "command")
                .with_reason(format!("command:{:?}", command.kind))
                .with_field("correlation_id", command.correlation_id.clone()),
        );

        match command.kind {
            CommandKind::Stop => {
                self.stop_requested = true;
                CommandResult::ok(command, "stopping")
            }
            CommandKind::Pause => {
                if self.state != EngineState::Paused {
                    self.resume_state = self.state;
                    self.transition(EngineState::Paused);
                }
                CommandResult::ok(command, "paused")
            }
            CommandKind::Resume => {
                if self.state == EngineState::Paused {
                    let target = self.resume_state;
                    self.transition(target);
                }
                CommandResult::ok(command, format!("state {}", self.state))
            }
            CommandKind::TimeStop => {
                let events = self.positions.flatten_all("time_stop").await;
                self.apply_position_events(&events);
                CommandResult::ok(command, format!("flattened {} positions", events.len()))
            }
            CommandKind::PanicExit => {
                self.enter_emergency("panic exit").await;
                CommandResult::ok(command, "emergency close executed")
            }
            CommandKind::KillSwitch => {
                self.risk.latch_kill_switch();
                self.enter_emergency("kill switch command").await;
                CommandResult::ok(command, "kill switch latched")
            }
            CommandKind::Retry => match self.state {
                EngineState::Error => {
                    self.error_retries = 0;
                    self.last_error = None;
                    self.transition(EngineState::Scanning);
                    CommandResult::ok(command, "retrying")
                }
                EngineState::Emergency => {
                    self.risk.reset_kill_switch();
                    metrics::KILL_SWITCH.set(0);
                    self.transition(EngineState::Scanning);
                    CommandResult::ok(command, "kill switch reset, scanning")
                }
                _ => CommandResult::ok(command, "nothing to retry"),
            },
        }
    }

    /// Flat-all and refuse new entries.
    async fn enter_emergency(&mut self, reason: &str) {
        if self.state == EngineState::Emergency {
            return;
        }
        warn!(reason, "Entering EMERGENCY");
        metrics::KILL_SWITCH.set(1);
        self.transition(EngineState::Emergency);
        let events = self.positions.flatten_all(reason).await;
        self.apply_position_events(&events);
        self.pending_signal = None;
        self.pending_size = None;
    }

    /// Drop caches and compact windows under memory pressure.
    fn optimisation_pass(&self) {
        info!("Resource optimisation pass");
        self.scanner.clear_caches();
        self.activity.lock().compact(30);
    }

    fn transition(&mut self, next: EngineState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Transition outside designed flow");
        }
        info!(from = %self.state, to = %next, "State transition");
        let from = self.state.to_string();
        let to = next.to_string();
        metrics::ENGINE_STATE.with_label_values(&[from.as_str()]).set(0.0);
        metrics::ENGINE_STATE.with_label_values(&[to.as_str()]).set(1.0);
        self.diag.record(
            DiagEvent::new("engine", "transition")
                .with_reason(format!("state:{next}"))
                .with_field("from", self.state.to_string())
                .with_field("to", next.to_string()),
        );
        self.state = next;
    }
}

/// Price band covered by a detected wall, half a bucket either side.
fn zone_around(price: f64, half_width_bps: f64) -> (f64, f64) {
    let half = price * half_width_bps / 10_000.0;
    (price - half, price + half)
}

/// Price change rate over the last few bars, per bar.
fn momentum_of(candles: &[bbot_core::Candle]) -> Option<f64> {
    if candles.len() < 4 {
        return None;
    }
    let last = candles[candles.len() - 1].close;
    let earlier = candles[candles.len() - 4].close;
    if earlier <= 0.0 {
        return None;
    }
    Some((last - earlier) / earlier / 3.0)
}
