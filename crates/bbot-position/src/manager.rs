//! Position manager and per-position exit state machine.
//!
//! States: pending, entry_confirm, running, breakeven, partial_closed,
//! trailing, exiting, closed. Transitions for one position are always
//! driven from a single call path (price or bar update under the
//! manager's lock), so they are serialised per position id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use bbot_core::{
    FsmState, Position, PositionStatus, Side, Signal, Symbol, TradeSide,
};
use bbot_diag::{DiagEvent, DiagSink};
use bbot_signal::{BreakoutRecord, SharedHistory};
use bbot_venue::{ExecutionClient, OrderRequest, VenueResult};

use crate::config::{ExitRulesConfig, FsmConfig, PositionConfig};
use crate::exits::{ExitMarketState, ExitRulesChecker, RuleExitSignal, Urgency};
use crate::tp::{place_ladder, PlacedTp, PlacementContext};

/// Events surfaced to the engine after each update.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    EntryConfirmed {
        position_id: String,
    },
    StopMoved {
        position_id: String,
        new_sl: f64,
        cause: &'static str,
    },
    TrailingActivated {
        position_id: String,
    },
    PartialClosed {
        position_id: String,
        level_name: String,
        qty: f64,
        pnl_usd: f64,
    },
    Closed {
        position_id: String,
        reason: String,
        pnl_usd: f64,
        pnl_r: f64,
    },
}

/// Per-bar market inputs for the exit rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarUpdate {
    pub close: f64,
    pub volume: f64,
    /// Price change rate over recent bars.
    pub momentum: f64,
}

/// A position plus its management state.
struct ManagedPosition {
    position: Position,
    placed_tps: Vec<PlacedTp>,
    original_qty: f64,
    bars_since_entry: u32,
    avg_volume_before_entry: Option<f64>,
    avg_momentum_before_entry: Option<f64>,
    entry_time: DateTime<Utc>,
    /// Fill distance from the intended entry, in bps.
    entry_slippage_bps: f64,
}

/// Owns every live position and drives the exit machinery.
pub struct PositionManager {
    config: PositionConfig,
    fsm_config: FsmConfig,
    exit_checker: ExitRulesChecker,
    executor: Arc<dyn ExecutionClient>,
    history: SharedHistory,
    diag: DiagSink,
    positions: Mutex<HashMap<String, ManagedPosition>>,
    closed: Mutex<Vec<Position>>,
}

impl PositionManager {
    pub fn new(
        config: PositionConfig,
        fsm_config: FsmConfig,
        exit_rules: ExitRulesConfig,
        executor: Arc<dyn ExecutionClient>,
        history: SharedHistory,
        diag: DiagSink,
    ) -> Self {
        Self {
            config,
            fsm_config,
            exit_checker: ExitRulesChecker::new(exit_rules),
            executor,
            history,
            diag,
            positions: Mutex::new(HashMap::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    /// Open a position for an approved, validated signal.
    ///
    /// Places a market entry, prices the TP ladder off the actual fill
    /// and records the breakout for the retest strategy.
    pub async fn open_position(
        &self,
        signal: &Signal,
        qty: f64,
        placement_ctx: &PlacementContext,
        pre_entry_volume: Option<f64>,
        pre_entry_momentum: Option<f64>,
    ) -> VenueResult<String> {
        let side = match signal.side {
            Side::Long => TradeSide::Buy,
            Side::Short => TradeSide::Sell,
        };
        let position_id = Uuid::new_v4().to_string();

        let order = self
            .executor
            .place_order(
                OrderRequest::market(signal.symbol.clone(), side, qty)
                    .for_position(position_id.clone()),
            )
            .await?;

        let entry = order.avg_fill_price.unwrap_or(signal.entry);
        let entry_slippage_bps = if signal.entry > 0.0 {
            (entry - signal.entry).abs() / signal.entry * 10_000.0
        } else {
            0.0
        };
        let now = Utc::now();

        let placed_tps = place_ladder(
            entry,
            signal.sl,
            signal.side,
            &self.config.tp_levels,
            &self.config.tp_smart_placement,
            placement_ctx,
        );

        let fsm_state = if self.fsm_config.enabled {
            FsmState::EntryConfirm
        } else {
            FsmState::Running
        };

        let position = Position {
            id: position_id.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            strategy: signal.strategy,
            qty: order.filled_qty.max(qty),
            entry,
            sl: signal.sl,
            tp_levels: self.config.tp_levels.iter().map(|t| t.to_tp_level()).collect(),
            status: PositionStatus::Open,
            realized_pnl_usd: -order.fees_usd,
            unrealized_pnl_r: 0.0,
            highest_seen: entry,
            lowest_seen: entry,
            breakout_level: signal.level,
            opened_at_ms: now.timestamp_millis(),
            closed_at_ms: None,
            fsm_state,
        };

        self.history.write().record(
            signal.symbol.clone(),
            BreakoutRecord {
                ts_ms: now.timestamp_millis(),
                level_price: signal.level,
                side: signal.side,
            },
        );

        self.record_transition(&position, "opened");
        info!(
            position_id = %position_id,
            symbol = %signal.symbol,
            side = %signal.side,
            qty = position.qty,
            entry,
            sl = signal.sl,
            "Position opened"
        );

        self.positions.lock().insert(
            position_id.clone(),
            ManagedPosition {
                position,
                placed_tps,
                original_qty: qty,
                bars_since_entry: 0,
                avg_volume_before_entry: pre_entry_volume,
                avg_momentum_before_entry: pre_entry_momentum,
                entry_time: now,
                entry_slippage_bps,
            },
        );

        Ok(position_id)
    }

    /// Intrabar price update: stop, targets, breakeven and trailing.
    pub async fn on_price(&self, symbol: &Symbol, price: f64) -> Vec<PositionEvent> {
        let mut events = Vec::new();
        let ids = self.ids_for(symbol);

        for id in ids {
            // Decide under the lock, execute outside it.
            let decision = {
                let mut positions = self.positions.lock();
                let Some(managed) = positions.get_mut(&id) else {
                    continue;
                };
                Self::price_step(&self.config, &self.fsm_config, managed, price, &mut events)
            };
            self.execute_decision(&id, decision, price, &mut events).await;
        }
        events
    }

    /// Bar-close update: confirmation bars, bar counters, exit rules.
    pub async fn on_bar(&self, symbol: &Symbol, update: BarUpdate) -> Vec<PositionEvent> {
        let mut events = Vec::new();
        let ids = self.ids_for(symbol);
        let now = Utc::now();

        for id in ids {
            let (decision, rule_exit) = {
                let mut positions = self.positions.lock();
                let Some(managed) = positions.get_mut(&id) else {
                    continue;
                };
                managed.bars_since_entry += 1;

                if managed.position.fsm_state == FsmState::EntryConfirm
                    && managed.bars_since_entry >= self.fsm_config.entry_confirm_bars
                {
                    if managed.entry_slippage_bps > self.fsm_config.max_entry_slippage_bps {
                        // The fill landed too far from the intended
                        // entry; the trade geometry no longer holds.
                        warn!(
                            position_id = %id,
                            slippage_bps = managed.entry_slippage_bps,
                            "Entry slippage beyond tolerance, exiting"
                        );
                        drop(positions);
                        self.close_position(&id, "entry_slippage", None, &mut events)
                            .await;
                        continue;
                    }
                    managed.position.fsm_state = FsmState::Running;
                    self.record_transition(&managed.position, "entry_confirmed");
                    events.push(PositionEvent::EntryConfirmed {
                        position_id: id.clone(),
                    });
                }

                let decision = Self::price_step(
                    &self.config,
                    &self.fsm_config,
                    managed,
                    update.close,
                    &mut events,
                );

                let rule_exit = if decision.is_none()
                    && managed.position.fsm_state != FsmState::Exiting
                    && managed.position.status.is_active()
                {
                    let state = ExitMarketState {
                        current_price: update.close,
                        current_volume: update.volume,
                        current_momentum: update.momentum,
                        bars_since_entry: managed.bars_since_entry,
                        entry_price: managed.position.entry,
                        breakout_level: managed.position.breakout_level,
                        highest_price: managed.position.highest_seen,
                        lowest_price: managed.position.lowest_seen,
                        entry_time: managed.entry_time,
                        is_long: managed.position.side == Side::Long,
                        avg_volume_before_entry: managed.avg_volume_before_entry,
                        avg_momentum_before_entry: managed.avg_momentum_before_entry,
                    };
                    self.exit_checker.should_exit(&state, now)
                } else {
                    None
                };
                (decision, rule_exit)
            };

            self.execute_decision(&id, decision, update.close, &mut events)
                .await;

            if let Some(exit) = rule_exit {
                self.execute_rule_exit(&id, exit, &mut events).await;
            }
        }
        events
    }

    /// Cancel everything and market-close every open position.
    pub async fn flatten_all(&self, reason: &str) -> Vec<PositionEvent> {
        let ids: Vec<String> = self.positions.lock().keys().cloned().collect();
        let mut events = Vec::new();
        for id in ids {
            self.close_position(&id, reason, None, &mut events).await;
        }
        events
    }

    /// Open positions, cloned.
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .lock()
            .values()
            .map(|m| m.position.clone())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.positions.lock().len()
    }

    /// Closed position history, oldest first.
    pub fn closed_positions(&self) -> Vec<Position> {
        self.closed.lock().clone()
    }

    pub fn position(&self, id: &str) -> Option<Position> {
        self.positions.lock().get(id).map(|m| m.position.clone())
    }

    fn ids_for(&self, symbol: &Symbol) -> Vec<String> {
        self.positions
            .lock()
            .iter()
            .filter(|(_, m)| m.position.symbol == *symbol)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Pure transition step on a price observation. Returns what must be
    /// executed against the venue, if anything.
    fn price_step(
        config: &PositionConfig,
        _fsm_config: &FsmConfig,
        managed: &mut ManagedPosition,
        price: f64,
        events: &mut Vec<PositionEvent>,
    ) -> Option<StepDecision> {
        let position = &mut managed.position;
        if !position.status.is_active() || position.fsm_state == FsmState::Exiting {
            return None;
        }
        position.observe_price(price);
        let r = position.r_unit();
        if r <= 0.0 {
            return Some(StepDecision::ExitAll {
                reason: "degenerate stop geometry".to_string(),
            });
        }
        position.unrealized_pnl_r = position.excursion_r(price);

        // Stop loss touched.
        let stopped = match position.side {
            Side::Long => price <= position.sl,
            Side::Short => price >= position.sl,
        };
        if stopped {
            return Some(StepDecision::ExitAll {
                reason: "stop_loss".to_string(),
            });
        }

        // Take profits, in ladder order.
        for (index, tp) in managed.placed_tps.iter().enumerate() {
            if tp.triggered {
                continue;
            }
            let hit = match position.side {
                Side::Long => price >= tp.price,
                Side::Short => price <= tp.price,
            };
            if hit {
                let is_last = managed
                    .placed_tps
                    .iter()
                    .enumerate()
                    .all(|(i, t)| t.triggered || i == index);
                return Some(StepDecision::TakeProfit { index, is_last });
            }
        }

        // Breakeven move on sufficient excursion.
        if matches!(position.fsm_state, FsmState::Running)
            && position.excursion_r(price) >= config.breakeven_trigger_r
        {
            let buffer = position.entry * config.breakeven_buffer_bps / 10_000.0;
            let new_sl = position.entry + buffer * position.side.sign();
            if Self::tightens(position.side, position.sl, new_sl) {
                position.sl = new_sl;
                position.fsm_state = FsmState::Breakeven;
                events.push(PositionEvent::StopMoved {
                    position_id: position.id.clone(),
                    new_sl,
                    cause: "breakeven",
                });
            }
        }

        // Trailing activation after a partial close.
        if matches!(position.fsm_state, FsmState::PartialClosed)
            && position.excursion_r(price) >= config.trailing_activation_r
        {
            position.fsm_state = FsmState::Trailing;
            events.push(PositionEvent::TrailingActivated {
                position_id: position.id.clone(),
            });
        }

        // Trailing stop follows the favourable extreme.
        if position.fsm_state == FsmState::Trailing {
            let trail = config.trailing_step_bps / 10_000.0;
            let candidate = match position.side {
                Side::Long => position.highest_seen * (1.0 - trail),
                Side::Short => position.lowest_seen * (1.0 + trail),
            };
            if Self::tightens(position.side, position.sl, candidate) {
                position.sl = candidate;
                events.push(PositionEvent::StopMoved {
                    position_id: position.id.clone(),
                    new_sl: candidate,
                    cause: "trailing",
                });
            }
        }

        None
    }

    /// A stop move must only ever tighten.
    fn tightens(side: Side, current_sl: f64, candidate: f64) -> bool {
        match side {
            Side::Long => candidate > current_sl,
            Side::Short => candidate < current_sl,
        }
    }

    async fn execute_decision(
        &self,
        id: &str,
        decision: Option<StepDecision>,
        price: f64,
        events: &mut Vec<PositionEvent>,
    ) {
        match decision {
            None => {}
            Some(StepDecision::ExitAll { reason }) => {
                self.close_position(id, &reason, Some(price), events).await;
            }
            Some(StepDecision::TakeProfit { index, is_last }) => {
                self.take_profit(id, index, is_last, events).await;
            }
        }
    }

    async fn execute_rule_exit(
        &self,
        id: &str,
        exit: RuleExitSignal,
        events: &mut Vec<PositionEvent>,
    ) {
        self.diag.record(
            DiagEvent::new("position", "rule_exit")
                .with_reason(format!("exit:{}", exit.rule_name))
                .with_field("confidence", exit.confidence)
                .with_field(
                    "urgency",
                    match exit.urgency {
                        Urgency::Immediate => "immediate",
                        Urgency::Normal => "normal",
                        Urgency::Low => "low",
                    },
                ),
        );
        self.close_position(id, exit.rule_name, None, events).await;
    }

    /// Close one TP rung: reduce-only market for the rung's share.
    async fn take_profit(
        &self,
        id: &str,
        index: usize,
        is_last: bool,
        events: &mut Vec<PositionEvent>,
    ) {
        let (symbol, close_side, qty, level_name) = {
            let positions = self.positions.lock();
            let Some(managed) = positions.get(id) else {
                return;
            };
            let tp = &managed.placed_tps[index];
            let qty = if is_last {
                managed.position.qty
            } else {
                (managed.original_qty * tp.size_pct).min(managed.position.qty)
            };
            (
                managed.position.symbol.clone(),
                exit_side(&managed.position),
                qty,
                tp.level_name.clone(),
            )
        };
        if qty <= 0.0 {
            return;
        }

        let order = self
            .executor
            .place_order(
                OrderRequest::market(symbol.clone(), close_side, qty)
                    .reduce_only()
                    .for_position(id.to_string()),
            )
            .await;

        let order = match order {
            Ok(order) => order,
            Err(e) => {
                warn!(position_id = id, ?e, "Take-profit order failed");
                return;
            }
        };
        let fill = order.avg_fill_price.unwrap_or_default();

        let mut positions = self.positions.lock();
        let Some(managed) = positions.get_mut(id) else {
            return;
        };
        let position = &mut managed.position;
        let pnl = (fill - position.entry) * qty * position.side.sign() - order.fees_usd;
        position.realized_pnl_usd += pnl;
        position.qty = (position.qty - qty).max(0.0);
        managed.placed_tps[index].triggered = true;
        if let Some(tp_level) = position.tp_levels.get_mut(index) {
            tp_level.triggered = true;
        }

        events.push(PositionEvent::PartialClosed {
            position_id: id.to_string(),
            level_name,
            qty,
            pnl_usd: pnl,
        });

        if is_last || position.qty <= 0.0 {
            let original_qty = managed.original_qty;
            Self::finalise(position, "tp_ladder_complete");
            self.record_transition(position, "closed");
            let closed = position.clone();
            let pnl_usd = closed.realized_pnl_usd;
            let pnl_r = Self::pnl_r(&closed, original_qty);
            events.push(PositionEvent::Closed {
                position_id: id.to_string(),
                reason: "tp_ladder_complete".to_string(),
                pnl_usd,
                pnl_r,
            });
            positions.remove(id);
            self.closed.lock().push(closed);
        } else {
            // First partial moves the stop to breakeven.
            position.status = PositionStatus::Partial;
            if matches!(
                position.fsm_state,
                FsmState::EntryConfirm | FsmState::Running | FsmState::Breakeven
            ) {
                let buffer = position.entry * self.config.breakeven_buffer_bps / 10_000.0;
                let new_sl = position.entry + buffer * position.side.sign();
                if Self::tightens(position.side, position.sl, new_sl) {
                    position.sl = new_sl;
                    events.push(PositionEvent::StopMoved {
                        position_id: id.to_string(),
                        new_sl,
                        cause: "breakeven_after_tp",
                    });
                }
            }
            position.fsm_state = FsmState::PartialClosed;
            self.record_transition(position, "partial_closed");
        }
    }

    /// Reduce-only market exit of everything left.
    async fn close_position(
        &self,
        id: &str,
        reason: &str,
        _reference_price: Option<f64>,
        events: &mut Vec<PositionEvent>,
    ) {
        let (symbol, exit_side_v, qty) = {
            let mut positions = self.positions.lock();
            let Some(managed) = positions.get_mut(id) else {
                return;
            };
            managed.position.fsm_state = FsmState::Exiting;
            self.record_transition(&managed.position, "exiting");
            (
                managed.position.symbol.clone(),
                exit_side(&managed.position),
                managed.position.qty,
            )
        };

        let mut fill_price = None;
        let mut fees = 0.0;
        if qty > 0.0 {
            match self
                .executor
                .place_order(
                    OrderRequest::market(symbol.clone(), exit_side_v, qty)
                        .reduce_only()
                        .for_position(id.to_string()),
                )
                .await
            {
                Ok(order) => {
                    fill_price = order.avg_fill_price;
                    fees = order.fees_usd;
                }
                Err(e) => {
                    // The position is forced closed in our book anyway;
                    // the operator reconciles against the venue.
                    warn!(position_id = id, ?e, "Exit order failed");
                }
            }
        }

        let mut positions = self.positions.lock();
        let Some(mut managed) = positions.remove(id) else {
            return;
        };
        let position = &mut managed.position;
        if let Some(fill) = fill_price {
            let pnl = (fill - position.entry) * qty * position.side.sign() - fees;
            position.realized_pnl_usd += pnl;
        }
        position.qty = 0.0;
        Self::finalise(position, reason);
        self.record_transition(position, "closed");

        let pnl_usd = position.realized_pnl_usd;
        let pnl_r = Self::pnl_r(position, managed.original_qty);
        info!(
            position_id = id,
            reason,
            pnl_usd,
            pnl_r,
            "Position closed"
        );
        events.push(PositionEvent::Closed {
            position_id: id.to_string(),
            reason: reason.to_string(),
            pnl_usd,
            pnl_r,
        });
        self.closed.lock().push(managed.position);
    }

    fn finalise(position: &mut Position, _reason: &str) {
        position.status = PositionStatus::Closed;
        position.fsm_state = FsmState::Closed;
        position.closed_at_ms = Some(Utc::now().timestamp_millis());
    }

    /// Realised PnL in R units against the original stop distance and size.
    fn pnl_r(position: &Position, original_qty: f64) -> f64 {
        let r_usd = position.r_unit() * original_qty;
        if r_usd <= 0.0 {
            return 0.0;
        }
        position.realized_pnl_usd / r_usd
    }

    fn record_transition(&self, position: &Position, transition: &str) {
        self.diag.record(
            DiagEvent::new("position", "transition")
                .with_symbol(position.symbol.clone())
                .with_reason(format!("fsm:{transition}"))
                .with_field("position_id", position.id.clone())
                .with_field("state", position.fsm_state.to_string()),
        );
    }

    /// Time used by tests to pin entry times.
    #[cfg(test)]
    fn backdate_entry(&self, id: &str, entry_time: DateTime<Utc>) {
        if let Some(managed) = self.positions.lock().get_mut(id) {
            managed.entry_time = entry_time;
            managed.position.opened_at_ms = entry_time.timestamp_millis();
        }
    }
}

/// What a transition step asks the execution path to do.
#[derive(Debug, Clone, PartialEq)]
enum StepDecision {
    ExitAll { reason: String },
    TakeProfit { index: usize, is_last: bool },
}

fn exit_side(position: &Position) -> TradeSide {
    match position.side {
        Side::Long => TradeSide::Sell,
        Side::Short => TradeSide::Buy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbot_core::{PlacementMode, Strategy};
    use bbot_signal::BreakoutHistory;
    use bbot_venue::{PaperConfig, PaperExchange};
    use std::collections::BTreeMap;

    fn paper() -> Arc<PaperExchange> {
        Arc::new(PaperExchange::new(PaperConfig {
            initial_balance_usd: 20_000.0,
            slippage_bps: 0.0,
            taker_fee_bps: 0.0,
        }))
    }

    fn signal(entry: f64, sl: f64, level: f64) -> Signal {
        Signal {
            symbol: Symbol::new("TESTUSDT"),
            side: Side::Long,
            strategy: Strategy::Momentum,
            reason: "test".into(),
            entry,
            level,
            sl,
            tp1: None,
            tp2: None,
            confidence: 0.8,
            ts_ms: 0,
            meta: BTreeMap::new(),
        }
    }

    fn manager_with(
        exchange: Arc<PaperExchange>,
        config: PositionConfig,
        exit_rules: ExitRulesConfig,
    ) -> PositionManager {
        PositionManager::new(
            config,
            FsmConfig {
                enabled: true,
                entry_confirm_bars: 1,
                max_entry_slippage_bps: 50.0,
            },
            exit_rules,
            exchange,
            Arc::new(parking_lot::RwLock::new(BreakoutHistory::new())),
            DiagSink::disabled(),
        )
    }

    fn ladder_config() -> PositionConfig {
        PositionConfig {
            tp_levels: vec![
                crate::config::TpLevelConfig {
                    level_name: "tp1".into(),
                    reward_multiple: 1.0,
                    size_pct: 0.4,
                    placement_mode: PlacementMode::Smart,
                },
                crate::config::TpLevelConfig {
                    level_name: "tp2".into(),
                    reward_multiple: 2.0,
                    size_pct: 0.3,
                    placement_mode: PlacementMode::Fixed,
                },
                crate::config::TpLevelConfig {
                    level_name: "tp3".into(),
                    reward_multiple: 3.5,
                    size_pct: 0.3,
                    placement_mode: PlacementMode::Fixed,
                },
            ],
            breakeven_trigger_r: 1.0,
            breakeven_buffer_bps: 2.0,
            trailing_activation_r: 2.0,
            trailing_step_bps: 50.0,
            max_hold_time_hours: 24.0,
            tp_smart_placement: Default::default(),
        }
    }

    async fn open(manager: &PositionManager, exchange: &PaperExchange, sig: &Signal) -> String {
        let sym = sig.symbol.clone();
        exchange.update_mark(&sym, sig.entry);
        manager
            .open_position(sig, 10.0, &PlacementContext::default(), Some(1_000.0), Some(0.5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_breakout_runs_to_closed() {
        // Long from 100, breakout level 98, SL 99 relative geometry from
        // the scenario: the rule fires before the stop since the close
        // check happens on bar updates after the grace bars.
        let exchange = paper();
        let manager = manager_with(
            exchange.clone(),
            ladder_config(),
            ExitRulesConfig {
                failed_breakout_bars: 3,
                activity_drop_enabled: false,
                weak_impulse_enabled: false,
                time_stop_minutes: None,
                max_hold_time_hours: None,
                ..Default::default()
            },
        );
        let sig = signal(100.0, 96.5, 98.0);
        let _id = open(&manager, &exchange, &sig).await;

        // Four bars later the close is back under the breakout level.
        let sym = sig.symbol.clone();
        for close in [100.2, 100.1, 99.5] {
            exchange.update_mark(&sym, close);
            manager
                .on_bar(&sym, BarUpdate { close, volume: 900.0, momentum: 0.4 })
                .await;
        }
        exchange.update_mark(&sym, 97.0);
        let events = manager
            .on_bar(&sym, BarUpdate { close: 97.0, volume: 400.0, momentum: 0.1 })
            .await;

        let closed = events
            .iter()
            .find_map(|e| match e {
                PositionEvent::Closed { reason, pnl_usd, .. } => Some((reason.clone(), *pnl_usd)),
                _ => None,
            })
            .expect("closed event");
        assert_eq!(closed.0, "failed_breakout");
        // Filled at or below 97 on a 100 entry, 10 qty.
        assert!(closed.1 <= -29.9);
        assert_eq!(manager.open_count(), 0);
        assert_eq!(
            manager.closed_positions()[0].fsm_state,
            FsmState::Closed
        );
    }

    #[tokio::test]
    async fn test_multi_tp_ladder_with_breakeven_and_trailing() {
        let exchange = paper();
        let manager = manager_with(
            exchange.clone(),
            ladder_config(),
            ExitRulesConfig {
                failed_breakout_enabled: false,
                activity_drop_enabled: false,
                weak_impulse_enabled: false,
                time_stop_minutes: None,
                max_hold_time_hours: None,
                ..Default::default()
            },
        );
        let sig = signal(100.0, 99.0, 99.8);
        let id = open(&manager, &exchange, &sig).await;
        let sym = sig.symbol.clone();

        // TP1 at 101.0: 40% closes, stop moves to breakeven.
        exchange.update_mark(&sym, 101.0);
        let events = manager.on_price(&sym, 101.0).await;
        let partial = events
            .iter()
            .find_map(|e| match e {
                PositionEvent::PartialClosed { qty, level_name, .. } => {
                    Some((*qty, level_name.clone()))
                }
                _ => None,
            })
            .expect("partial close");
        assert!((partial.0 - 4.0).abs() < 1e-9);
        assert_eq!(partial.1, "tp1");

        let position = manager.position(&id).unwrap();
        assert_eq!(position.fsm_state, FsmState::PartialClosed);
        assert!(position.sl >= 100.0);
        assert!((position.qty - 6.0).abs() < 1e-9);

        // TP2 at 102.0: trailing activates at 2R.
        exchange.update_mark(&sym, 102.0);
        let events = manager.on_price(&sym, 102.0).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, PositionEvent::PartialClosed { .. })));
        let events = manager.on_price(&sym, 102.1).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, PositionEvent::TrailingActivated { .. })));

        // Trailing stop ratchets with new highs.
        let position = manager.position(&id).unwrap();
        let sl_after_activation = position.sl;
        manager.on_price(&sym, 103.0).await;
        let position = manager.position(&id).unwrap();
        assert!(position.sl > sl_after_activation);

        // Final TP at 103.5 closes the rest.
        exchange.update_mark(&sym, 103.5);
        let events = manager.on_price(&sym, 103.5).await;
        let closed = events
            .iter()
            .find_map(|e| match e {
                PositionEvent::Closed { reason, pnl_usd, .. } => Some((reason.clone(), *pnl_usd)),
                _ => None,
            })
            .expect("closed");
        assert_eq!(closed.0, "tp_ladder_complete");
        // 4 @ +1.0, 3 @ +2.0, 3 @ +3.5 on a 1.0 R unit.
        assert!((closed.1 - (4.0 + 6.0 + 10.5)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stop_loss_exit() {
        let exchange = paper();
        let manager = manager_with(
            exchange.clone(),
            ladder_config(),
            ExitRulesConfig {
                failed_breakout_enabled: false,
                activity_drop_enabled: false,
                weak_impulse_enabled: false,
                time_stop_minutes: None,
                max_hold_time_hours: None,
                ..Default::default()
            },
        );
        let sig = signal(100.0, 99.0, 99.8);
        let id = open(&manager, &exchange, &sig).await;
        let sym = sig.symbol.clone();

        exchange.update_mark(&sym, 98.9);
        let events = manager.on_price(&sym, 98.9).await;
        let closed = events
            .iter()
            .find_map(|e| match e {
                PositionEvent::Closed { reason, pnl_usd, pnl_r, .. } => {
                    Some((reason.clone(), *pnl_usd, *pnl_r))
                }
                _ => None,
            })
            .expect("closed");
        assert_eq!(closed.0, "stop_loss");
        assert!(closed.1 < 0.0);
        assert!(closed.2 < 0.0);
        assert!(manager.position(&id).is_none());
    }

    #[tokio::test]
    async fn test_max_hold_time_closes_eventually() {
        let exchange = paper();
        let manager = manager_with(
            exchange.clone(),
            ladder_config(),
            ExitRulesConfig {
                failed_breakout_enabled: false,
                activity_drop_enabled: false,
                weak_impulse_enabled: false,
                time_stop_minutes: None,
                max_hold_time_hours: Some(24.0),
                ..Default::default()
            },
        );
        let sig = signal(100.0, 99.0, 99.8);
        let id = open(&manager, &exchange, &sig).await;
        let sym = sig.symbol.clone();

        manager.backdate_entry(&id, Utc::now() - chrono::Duration::hours(30));
        exchange.update_mark(&sym, 100.2);
        let events = manager
            .on_bar(&sym, BarUpdate { close: 100.2, volume: 900.0, momentum: 0.4 })
            .await;
        assert!(events.iter().any(|e| matches!(
            e,
            PositionEvent::Closed { reason, .. } if reason == "max_hold_time"
        )));
    }

    /// Executor that fails every reduce-only order, for testing the
    /// forced-close path.
    struct FailingExits(Arc<PaperExchange>);

    impl ExecutionClient for FailingExits {
        fn place_order(
            &self,
            request: OrderRequest,
        ) -> bbot_venue::BoxFuture<'_, VenueResult<bbot_core::Order>> {
            if request.reduce_only {
                Box::pin(async { Err(bbot_venue::VenueError::Network("down".into())) })
            } else {
                self.0.place_order(request)
            }
        }

        fn cancel_order<'a>(
            &'a self,
            symbol: &'a Symbol,
            order_id: &'a str,
        ) -> bbot_venue::BoxFuture<'a, VenueResult<()>> {
            self.0.cancel_order(symbol, order_id)
        }

        fn fetch_balance(
            &self,
        ) -> bbot_venue::BoxFuture<'_, VenueResult<bbot_venue::AccountBalance>> {
            self.0.fetch_balance()
        }
    }

    #[tokio::test]
    async fn test_exit_order_failure_still_forces_close() {
        let paper_exchange = paper();
        let exec = Arc::new(FailingExits(paper_exchange.clone()));
        let manager = PositionManager::new(
            ladder_config(),
            FsmConfig::default(),
            ExitRulesConfig::default(),
            exec,
            Arc::new(parking_lot::RwLock::new(BreakoutHistory::new())),
            DiagSink::disabled(),
        );
        let sig = signal(100.0, 99.0, 99.8);
        let sym = sig.symbol.clone();
        paper_exchange.update_mark(&sym, 100.0);
        let _id = manager
            .open_position(&sig, 10.0, &PlacementContext::default(), None, None)
            .await
            .unwrap();

        // The venue rejects the exit, but the book must still go flat.
        let events = manager.flatten_all("emergency").await;
        assert!(events
            .iter()
            .any(|e| matches!(e, PositionEvent::Closed { .. })));
        assert_eq!(manager.open_count(), 0);
    }

    #[tokio::test]
    async fn test_flatten_all() {
        let exchange = paper();
        let manager = manager_with(exchange.clone(), ladder_config(), ExitRulesConfig::default());
        let a = signal(100.0, 99.0, 99.8);
        open(&manager, &exchange, &a).await;
        assert_eq!(manager.open_count(), 1);

        let events = manager.flatten_all("emergency").await;
        assert_eq!(manager.open_count(), 0);
        assert!(events
            .iter()
            .any(|e| matches!(e, PositionEvent::Closed { reason, .. } if reason == "emergency")));
    }
}
