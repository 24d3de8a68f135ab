//! Market data assembly and stream routing.
//!
//! The feed builds the per-cycle universe snapshot from REST (tickers
//! and candles) plus the live aggregators, and routes WebSocket events
//! into the trades aggregator and order book manager. A sequence gap in
//! the depth stream triggers a REST snapshot resync for that symbol.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bbot_core::{indicators, Candle, MarketData, Symbol};
use bbot_market::{ApplyOutcome, OrderBookManager, TradesAggregator};
use bbot_venue::{RestClient, VenueResult, WsEvent};

/// Candles per symbol for the scan snapshot.
const CANDLE_LIMIT: u32 = 60;

/// Book depth requested on snapshot and resync.
const BOOK_DEPTH: u32 = 50;

/// Reference symbol for correlation.
const BTC_SYMBOL: &str = "BTCUSDT";

/// Builds universe snapshots for the engine cycle.
pub struct MarketDataFeed {
    rest: Arc<RestClient>,
    trades: Arc<TradesAggregator>,
    books: Arc<OrderBookManager>,
    /// Universe cut before scanning: top N tickers by 24h turnover.
    universe_size: usize,
}

impl MarketDataFeed {
    pub fn new(
        rest: Arc<RestClient>,
        trades: Arc<TradesAggregator>,
        books: Arc<OrderBookManager>,
        universe_size: usize,
    ) -> Self {
        Self {
            rest,
            trades,
            books,
            universe_size,
        }
    }

    /// Assemble the scan universe and the BTC reference row.
    pub async fn assemble(&self) -> VenueResult<(Vec<MarketData>, Option<MarketData>)> {
        let mut tickers = self.rest.fetch_tickers().await?;
        tickers.sort_by(|a, b| {
            b.volume_24h_usd
                .partial_cmp(&a.volume_24h_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tickers.truncate(self.universe_size);

        let btc_symbol = Symbol::new(BTC_SYMBOL);
        let btc_candles = self
            .rest
            .fetch_ohlcv(&btc_symbol, 5, CANDLE_LIMIT, None)
            .await
            .unwrap_or_default();
        let btc_returns = indicators::log_returns(
            &btc_candles.iter().map(|c| c.close).collect::<Vec<f64>>(),
        );

        let mut universe = Vec::with_capacity(tickers.len());
        let mut btc_row = None;

        for ticker in &tickers {
            let candles = match self
                .rest
                .fetch_ohlcv(&ticker.symbol, 5, CANDLE_LIMIT, None)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    // One bad symbol never sinks the scan.
                    warn!(symbol = %ticker.symbol, ?e, "Candle fetch failed, skipping");
                    continue;
                }
            };

            let row = self.build_row(ticker, candles, &btc_returns);
            if row.symbol == btc_symbol {
                btc_row = Some(row.clone());
            }
            universe.push(row);
        }

        info!(count = universe.len(), "Universe assembled");
        Ok((universe, btc_row))
    }

    fn build_row(
        &self,
        ticker: &bbot_venue::TickerInfo,
        candles: Vec<Candle>,
        btc_returns: &[f64],
    ) -> MarketData {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let returns = indicators::log_returns(&closes);

        let atr_5m = indicators::atr(&candles, 14).unwrap_or(0.0);
        let candles_15m = resample_15m(&candles);
        let atr_15m = indicators::atr(&candles_15m, 14).unwrap_or(atr_5m * 1.7);
        let bb_width_pct = indicators::bollinger_width_pct(&closes, 20, 2.0).unwrap_or(0.0);
        let btc_correlation = if ticker.symbol.as_str() == BTC_SYMBOL {
            1.0
        } else {
            indicators::pearson_correlation(&returns, btc_returns).unwrap_or(0.0)
        };

        let trades_per_minute = self
            .trades
            .metrics(&ticker.symbol)
            .map(|m| m.tpm_60s)
            .unwrap_or(0.0);

        MarketData {
            symbol: ticker.symbol.clone(),
            price: ticker.last_price,
            volume_24h_usd: ticker.volume_24h_usd,
            oi_usd: ticker.oi_usd,
            oi_change_24h: None,
            trades_per_minute,
            atr_5m,
            atr_15m,
            bb_width_pct,
            btc_correlation,
            l2_depth: self.books.l2_depth(&ticker.symbol),
            candles_5m: candles,
            ts_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Route stream events into the aggregators until the channel closes.
///
/// Depth sequence gaps are healed with a REST snapshot; parse failures
/// were already dropped inside the stream client.
pub async fn run_stream_router(
    mut events: mpsc::Receiver<WsEvent>,
    trades: Arc<TradesAggregator>,
    books: Arc<OrderBookManager>,
    rest: Arc<RestClient>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WsEvent::Trade { symbol, trade } => {
                trades.on_trade(&symbol, trade);
            }
            WsEvent::Book { symbol, message } => {
                let ts_ms = chrono::Utc::now().timestamp_millis();
                if books.apply(&symbol, ts_ms, message) == ApplyOutcome::Resync {
                    match rest.fetch_order_book(&symbol, BOOK_DEPTH).await {
                        Ok(snapshot) => {
                            debug!(%symbol, "Book resynced from REST");
                            books.update_snapshot(symbol, snapshot);
                        }
                        Err(e) => {
                            warn!(%symbol, ?e, "Book resync failed");
                        }
                    }
                }
            }
            WsEvent::Connected => {
                info!("Stream connected");
            }
            WsEvent::Disconnected { reason } => {
                warn!(%reason, "Stream disconnected");
            }
            WsEvent::SubscriptionAck { .. } => {}
        }
    }
    info!("Stream router finished");
}

/// Fold 5m candles into 15m bars, oldest first.
fn resample_15m(candles: &[Candle]) -> Vec<Candle> {
    candles
        .chunks(3)
        .filter(|chunk| chunk.len() == 3)
        .map(|chunk| {
            Candle::new(
                chunk[0].ts_ms,
                chunk[0].open,
                chunk.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
                chunk.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
                chunk[2].close,
                chunk.iter().map(|c| c.volume).sum(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_15m_folds_triples() {
        let candles: Vec<Candle> = (0..9)
            .map(|i| {
                Candle::new(
                    i * 300_000,
                    100.0 + i as f64,
                    101.0 + i as f64,
                    99.0 + i as f64,
                    100.5 + i as f64,
                    10.0,
                )
            })
            .collect();
        let folded = resample_15m(&candles);
        assert_eq!(folded.len(), 3);
        assert_eq!(folded[0].open, 100.0);
        assert_eq!(folded[0].close, 102.5);
        assert_eq!(folded[0].high, 103.0);
        assert_eq!(folded[0].low, 99.0);
        assert_eq!(folded[0].volume, 30.0);
    }

    #[test]
    fn test_resample_drops_partial_tail() {
        let candles: Vec<Candle> = (0..7)
            .map(|i| Candle::new(i * 300_000, 1.0, 2.0, 0.5, 1.5, 1.0))
            .collect();
        assert_eq!(resample_15m(&candles).len(), 2);
    }
}
