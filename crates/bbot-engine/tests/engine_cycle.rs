//! Engine lifecycle integration tests.
//!
//! Drives the state machine over a synthetic universe with the paper
//! exchange: the full scan, signal, sizing, execution and managing
//! path, plus the command branches.

use std::sync::Arc;

use bbot_core::{BookLevel, Candle, MarketData, Symbol};
use bbot_diag::DiagSink;
use bbot_engine::{command_channel, Command, CommandKind, CommandSender, Engine, EngineState, Preset};
use bbot_market::{OrderBookManager, TradesAggregator};
use bbot_telemetry::ResourceLimits;
use bbot_venue::{BookMessage, PaperConfig, PaperExchange};

/// A market in flat consolidation that breaks out on the last bar.
fn breakout_market(symbol: &str) -> MarketData {
    let mut candles: Vec<Candle> = (0..39)
        .map(|i| Candle::new(i as i64 * 300_000, 99.95, 100.05, 99.95, 100.0, 1_000.0))
        .collect();
    candles.push(Candle::new(
        39 * 300_000,
        100.00,
        100.22,
        100.02,
        100.20,
        5_000.0,
    ));

    MarketData {
        symbol: Symbol::new(symbol),
        price: 100.20,
        volume_24h_usd: 50_000_000.0,
        oi_usd: Some(20_000_000.0),
        oi_change_24h: Some(0.04),
        trades_per_minute: 25.0,
        atr_5m: 0.11,
        atr_15m: 2.0,
        bb_width_pct: 2.5,
        btc_correlation: 0.2,
        l2_depth: None,
        candles_5m: candles,
        ts_ms: 0,
    }
}

/// A quiet market that fails the liquidity filters.
fn quiet_market(symbol: &str) -> MarketData {
    let mut market = breakout_market(symbol);
    market.trades_per_minute = 0.0;
    market.volume_24h_usd = 100_000.0;
    market
}

struct Harness {
    engine: Engine,
    paper: Arc<PaperExchange>,
    commands: CommandSender,
    symbol: Symbol,
}

fn harness() -> Harness {
    let preset = Preset::example();
    let symbol = Symbol::new("BRKUSDT");

    let paper = Arc::new(PaperExchange::new(PaperConfig {
        initial_balance_usd: 20_000.0,
        slippage_bps: 0.0,
        taker_fee_bps: 0.0,
    }));
    paper.update_mark(&symbol, 100.20);

    let trades = Arc::new(TradesAggregator::new());
    let books = Arc::new(OrderBookManager::new());
    // A bid-heavy book so the imbalance predicate has something to read.
    books.apply(
        &symbol,
        1_000,
        BookMessage::Snapshot {
            bids: vec![BookLevel::new(100.15, 40.0), BookLevel::new(100.10, 20.0)],
            asks: vec![BookLevel::new(100.25, 10.0), BookLevel::new(100.30, 10.0)],
            update_id: 1,
        },
    );

    let (commands, command_rx) = command_channel();
    let engine = Engine::new(
        preset,
        paper.clone(),
        trades,
        books,
        DiagSink::disabled(),
        command_rx,
        20_000.0,
        ResourceLimits {
            memory_cap_bytes: u64::MAX,
            ..Default::default()
        },
    );

    Harness {
        engine,
        paper,
        commands,
        symbol,
    }
}

async fn drive_until(
    harness: &mut Harness,
    universe: &[MarketData],
    target: EngineState,
    max_cycles: usize,
) -> bool {
    for _ in 0..max_cycles {
        harness
            .engine
            .run_cycle(universe.to_vec(), None)
            .await
            .unwrap();
        if harness.engine.state() == target {
            return true;
        }
    }
    false
}

#[tokio::test]
async fn test_breakout_flows_to_open_position() {
    let mut harness = harness();
    let universe = vec![breakout_market("BRKUSDT")];

    let reached = drive_until(&mut harness, &universe, EngineState::Managing, 10).await;
    assert!(reached, "engine should reach MANAGING, got {}", harness.engine.state());

    let health = harness.engine.health();
    assert_eq!(health.open_positions, 1);
    assert!(!health.kill_switch_active);

    // The paper exchange holds the fill.
    assert!(!harness.paper.fills().is_empty());
}

#[tokio::test]
async fn test_quiet_universe_stays_scanning() {
    let mut harness = harness();
    let universe = vec![quiet_market("BRKUSDT")];

    for _ in 0..4 {
        harness
            .engine
            .run_cycle(universe.clone(), None)
            .await
            .unwrap();
    }
    assert_eq!(harness.engine.state(), EngineState::Scanning);
    assert_eq!(harness.engine.health().open_positions, 0);
}

#[tokio::test]
async fn test_kill_switch_command_goes_emergency_and_retry_recovers() {
    let mut harness = harness();
    let universe = vec![breakout_market("BRKUSDT")];
    assert!(drive_until(&mut harness, &universe, EngineState::Managing, 10).await);

    harness
        .commands
        .send(Command::new(CommandKind::KillSwitch));
    harness
        .engine
        .run_cycle(universe.clone(), None)
        .await
        .unwrap();

    assert_eq!(harness.engine.state(), EngineState::Emergency);
    let health = harness.engine.health();
    assert!(health.kill_switch_active);
    // Emergency close flattened the book.
    assert_eq!(health.open_positions, 0);

    // Further cycles refuse to leave emergency.
    harness
        .engine
        .run_cycle(universe.clone(), None)
        .await
        .unwrap();
    assert_eq!(harness.engine.state(), EngineState::Emergency);

    // Operator retry unlatches and resumes scanning.
    harness.commands.send(Command::new(CommandKind::Retry));
    harness
        .engine
        .run_cycle(universe.clone(), None)
        .await
        .unwrap();
    assert!(!harness.engine.health().kill_switch_active);
    assert_ne!(harness.engine.state(), EngineState::Emergency);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let mut harness = harness();
    let universe = vec![quiet_market("BRKUSDT")];

    harness
        .engine
        .run_cycle(universe.clone(), None)
        .await
        .unwrap();
    assert_eq!(harness.engine.state(), EngineState::Scanning);

    harness.commands.send(Command::new(CommandKind::Pause));
    harness
        .engine
        .run_cycle(universe.clone(), None)
        .await
        .unwrap();
    assert_eq!(harness.engine.state(), EngineState::Paused);

    // Pause is idempotent.
    harness.commands.send(Command::new(CommandKind::Pause));
    harness
        .engine
        .run_cycle(universe.clone(), None)
        .await
        .unwrap();
    assert_eq!(harness.engine.state(), EngineState::Paused);

    harness.commands.send(Command::new(CommandKind::Resume));
    harness
        .engine
        .run_cycle(universe.clone(), None)
        .await
        .unwrap();
    assert_eq!(harness.engine.state(), EngineState::Scanning);
}

#[tokio::test]
async fn test_stop_command_requests_shutdown() {
    let mut harness = harness();
    harness.commands.send(Command::new(CommandKind::Stop));
    harness
        .engine
        .run_cycle(vec![], None)
        .await
        .unwrap();
    assert!(harness.engine.stop_requested());
}
