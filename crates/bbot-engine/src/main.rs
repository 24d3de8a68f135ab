//! `bbot` binary: run the breakout engine with a preset, paper or live.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use bbot_engine::{
    command_channel, run_stream_router, Command, CommandKind, Engine, MarketDataFeed, Preset,
};
use bbot_market::{OrderBookManager, TradesAggregator};
use bbot_telemetry::{init_logging, ResourceLimits};
use bbot_venue::{
    book_topic, trade_topic, ExecutionClient, PaperConfig, PaperExchange, RateLimiter, RestClient,
    RestConfig, WsClient, WsConfig,
};
use bbot_diag::DiagWriter;

#[derive(Parser)]
#[command(name = "bbot", about = "Breakout trading engine for perpetual futures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with a preset.
    Run {
        /// Path to the preset JSON file.
        #[arg(long, short)]
        preset: PathBuf,
        /// Paper-trading mode: simulated fills, no live orders.
        #[arg(long)]
        paper: bool,
        /// Diagnostics output directory.
        #[arg(long, default_value = "diagnostics")]
        diag_dir: PathBuf,
        /// Starting equity for paper mode, USD.
        #[arg(long, default_value_t = 20_000.0)]
        equity: f64,
        /// Venue REST base URL.
        #[arg(long, default_value = "https://api.bybit.com")]
        rest_url: String,
        /// Venue public stream URL.
        #[arg(long, default_value = "wss://stream.bybit.com/v5/public/linear")]
        ws_url: String,
        /// Symbols considered each cycle, by 24h turnover.
        #[arg(long, default_value_t = 60)]
        universe: usize,
    },
    /// Write an example preset to stdout.
    ExamplePreset,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging().context("logging init")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::ExamplePreset => {
            println!("{}", serde_json::to_string_pretty(&Preset::example())?);
            Ok(())
        }
        Commands::Run {
            preset,
            paper,
            diag_dir,
            equity,
            rest_url,
            ws_url,
            universe,
        } => {
            run(preset, paper, diag_dir, equity, rest_url, ws_url, universe).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    preset_path: PathBuf,
    paper: bool,
    diag_dir: PathBuf,
    equity: f64,
    rest_url: String,
    ws_url: String,
    universe_size: usize,
) -> Result<()> {
    let preset = Preset::load(&preset_path)
        .with_context(|| format!("loading preset {}", preset_path.display()))?;
    info!(name = %preset.name, paper, "Preset loaded");

    let session_id = uuid::Uuid::new_v4().to_string();
    let (diag, diag_writer) =
        DiagWriter::spawn(&diag_dir, &session_id).context("diagnostics writer")?;

    let limiter = RateLimiter::with_venue_defaults();
    let rest = Arc::new(
        RestClient::new(
            RestConfig {
                base_url: rest_url,
                api_key: std::env::var("BBOT_API_KEY").unwrap_or_default(),
                api_secret: std::env::var("BBOT_API_SECRET").unwrap_or_default(),
                ..Default::default()
            },
            limiter,
        )
        .context("rest client")?,
    );

    let trades = Arc::new(TradesAggregator::new());
    let books = Arc::new(OrderBookManager::new());

    let paper_exchange = paper.then(|| {
        Arc::new(PaperExchange::new(PaperConfig {
            initial_balance_usd: equity,
            slippage_bps: preset.execution_config.slippage_bps,
            taker_fee_bps: preset.execution_config.taker_fee_bps,
        }))
    });
    let executor: Arc<dyn ExecutionClient> = match &paper_exchange {
        Some(paper) => paper.clone(),
        None => rest.clone(),
    };

    let session_start_equity = executor
        .fetch_balance()
        .await
        .map(|b| b.equity_usd)
        .unwrap_or(equity);

    let (command_tx, command_rx) = command_channel();
    let mut engine = Engine::new(
        preset,
        executor,
        trades.clone(),
        books.clone(),
        diag,
        command_rx,
        session_start_equity,
        ResourceLimits::default(),
    );

    match rest.fetch_markets().await {
        Ok(meta) => engine.set_market_meta(meta),
        Err(e) => warn!(?e, "Market metadata unavailable, precision stepping disabled"),
    }

    // Public stream into the aggregators.
    let (event_tx, event_rx) = mpsc::channel(8192);
    let (ws_client, ws_handle) = WsClient::new(
        WsConfig {
            url: ws_url,
            ..Default::default()
        },
        event_tx,
    );
    tokio::spawn(async move {
        if let Err(e) = ws_client.run().await {
            error!(?e, "Stream client exited");
        }
    });
    tokio::spawn(run_stream_router(
        event_rx,
        trades.clone(),
        books.clone(),
        rest.clone(),
    ));

    // Ctrl-C stops the engine gracefully.
    let stop_tx = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            let _ = stop_tx.send(Command::new(CommandKind::Stop));
        }
    });

    let feed = MarketDataFeed::new(rest, trades.clone(), books, universe_size);
    let mut subscribed: Vec<String> = Vec::new();

    loop {
        let (universe, btc_data) = match feed.assemble().await {
            Ok(v) => v,
            Err(e) => {
                engine.note_cycle_error(format!("universe assembly: {e}"));
                tokio::time::sleep(engine.cycle_delay()).await;
                continue;
            }
        };

        // Track streams for whatever the universe currently holds.
        let mut wanted = Vec::new();
        for market in &universe {
            trades.track(market.symbol.clone());
            let topic = trade_topic(&market.symbol);
            if !subscribed.contains(&topic) {
                wanted.push(topic);
                wanted.push(book_topic(&market.symbol, 50));
            }
        }
        if !wanted.is_empty() {
            subscribed.extend(wanted.clone());
            ws_handle.subscribe(wanted);
        }

        // Paper fills track the latest mid or close.
        if let Some(paper) = &paper_exchange {
            for market in &universe {
                paper.update_mark(&market.symbol, market.price);
            }
        }

        if let Err(e) = engine.run_cycle(universe, btc_data).await {
            engine.note_cycle_error(e.to_string());
        }
        if engine.stop_requested() {
            break;
        }

        tokio::time::sleep(engine.cycle_delay()).await;
    }

    info!("Engine stopped, draining diagnostics");
    drop(engine);
    tokio::time::timeout(Duration::from_secs(5), diag_writer.shutdown())
        .await
        .ok();
    Ok(())
}
