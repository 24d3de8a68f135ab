//! Market scanner pipeline.
//!
//! Order of operations per cycle:
//! 1. whitelist/blacklist
//! 2. optional top-N by 24h volume
//! 3. batches under a bounded-concurrency semaphore; batch size shrinks
//!    under memory pressure
//! 4. per market: filters (all groups, no short-circuit), composite
//!    score, level detection for fully passing rows
//! 5. sort by score, truncate to `max_candidates`, assign ranks
//!
//! Filter and score results are cached behind coarse keys with separate
//! TTLs so repeated scans of a quiet universe stay cheap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use bbot_core::{FilterOutcome, MarketData, ScanResult, Symbol};
use bbot_diag::{DiagEvent, DiagSink};
use bbot_features::{LevelConfig, LevelDetector};

use crate::cache::TtlCache;
use crate::filters::{
    apply_correlation_filter, apply_liquidity_filters, apply_volatility_filters, LiquidityFilters,
    VolatilityFilters,
};
use crate::metrics::ScanMetrics;
use crate::score::{MarketScorer, ScoreWeights};

/// Scanner behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    pub max_candidates: usize,
    pub scan_interval_seconds: u64,
    pub top_n_by_volume: Option<usize>,
    pub symbol_whitelist: Option<Vec<Symbol>>,
    pub symbol_blacklist: Option<Vec<Symbol>>,
    pub score_weights: ScoreWeights,
    /// Base batch size before memory-pressure shrink.
    pub batch_size: usize,
    /// Concurrent batches.
    pub max_concurrent_batches: usize,
    pub correlation_limit: f64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            scan_interval_seconds: 30,
            top_n_by_volume: None,
            symbol_whitelist: None,
            symbol_blacklist: None,
            score_weights: ScoreWeights::default(),
            batch_size: 20,
            max_concurrent_batches: 2,
            correlation_limit: 0.7,
        }
    }
}

/// Filter cache TTL.
const FILTER_CACHE_TTL: Duration = Duration::from_secs(60);
/// Score cache TTL.
const SCORE_CACHE_TTL: Duration = Duration::from_secs(300);
/// Cache size cap, entries.
const CACHE_MAX_SIZE: usize = 200;

type FilterMap = BTreeMap<String, FilterOutcome>;

/// The breakout market scanner.
pub struct Scanner {
    settings: ScannerSettings,
    liquidity: LiquidityFilters,
    volatility: VolatilityFilters,
    scorer: MarketScorer,
    level_detector: LevelDetector,
    filter_cache: Mutex<TtlCache<String, FilterMap>>,
    score_cache: Mutex<TtlCache<String, (f64, BTreeMap<String, f64>)>>,
    diag: DiagSink,
}

impl Scanner {
    pub fn new(
        settings: ScannerSettings,
        liquidity: LiquidityFilters,
        volatility: VolatilityFilters,
        level_config: LevelConfig,
        diag: DiagSink,
    ) -> Self {
        let scorer = MarketScorer::new(settings.score_weights.clone());
        Self {
            settings,
            liquidity,
            volatility,
            scorer,
            level_detector: LevelDetector::new(level_config),
            filter_cache: Mutex::new(TtlCache::new(FILTER_CACHE_TTL, CACHE_MAX_SIZE)),
            score_cache: Mutex::new(TtlCache::new(SCORE_CACHE_TTL, CACHE_MAX_SIZE)),
            diag,
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Drop both caches. Called by the engine's optimisation pass.
    pub fn clear_caches(&self) {
        self.filter_cache.lock().clear();
        self.score_cache.lock().clear();
    }

    /// Scan the universe and return ranked candidates.
    ///
    /// `memory_pct` is the current RSS fraction from the resource
    /// monitor and only influences batch sizing.
    pub async fn scan(
        self: &Arc<Self>,
        markets: Vec<MarketData>,
        _btc_data: Option<MarketData>,
        memory_pct: f32,
    ) -> Vec<ScanResult> {
        let universe = self.apply_symbol_filters(markets);
        let universe = self.apply_volume_cut(universe);
        info!(count = universe.len(), "Scanning markets");

        let batch_size = self.effective_batch_size(memory_pct);
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_batches));
        let mut join_set = JoinSet::new();

        let batches: Vec<Vec<MarketData>> = universe
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        for batch in batches {
            let scanner = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                batch
                    .into_iter()
                    .map(|market| scanner.scan_single(market))
                    .collect::<Vec<ScanResult>>()
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(batch_results) => results.extend(batch_results),
                Err(e) => warn!(?e, "Scanner batch task failed"),
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(self.settings.max_candidates);
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = (i + 1) as u32;
        }

        let passing = results.iter().filter(|r| r.passed_all_filters).count();
        info!(
            candidates = results.len(),
            passing, "Scan complete"
        );
        results
    }

    /// Scan one market. Always produces a result row.
    pub fn scan_single(&self, market: MarketData) -> ScanResult {
        let metrics = ScanMetrics::compute(&market);
        let mut filter_details = self.filters_cached(&market, &metrics);

        // A market with no candle history cannot be traded this cycle.
        if market.candles_5m.is_empty() {
            filter_details.insert(
                "data_available".to_string(),
                FilterOutcome::fail(0.0, 1.0, "no candle history"),
            );
        }

        let passed_all = filter_details.values().all(|o| o.passed);

        let (score, score_components) = if market.candles_5m.is_empty() {
            (0.0, BTreeMap::new())
        } else {
            self.score_cached(&market, &metrics)
        };

        // Level detection is the expensive step; only run it for rows
        // that survived every filter.
        let levels = if passed_all && !market.candles_5m.is_empty() {
            self.level_detector.detect_levels(&market.candles_5m)
        } else {
            Vec::new()
        };

        for (name, outcome) in &filter_details {
            if !outcome.passed {
                self.diag.record(
                    DiagEvent::new("scanner", "filter")
                        .with_symbol(market.symbol.clone())
                        .with_reason(format!("filter:{name}"))
                        .with_passed(false)
                        .with_field("value", outcome.value.unwrap_or(f64::NAN))
                        .with_field("threshold", outcome.threshold),
                );
            }
        }

        if passed_all {
            debug!(symbol = %market.symbol, score, "Market passed all filters");
        } else {
            let failed: Vec<&String> = filter_details
                .iter()
                .filter(|(_, o)| !o.passed)
                .map(|(n, _)| n)
                .collect();
            debug!(symbol = %market.symbol, ?failed, "Market filtered out");
        }

        let filter_results = filter_details
            .iter()
            .map(|(name, outcome)| (name.clone(), outcome.passed))
            .collect();

        ScanResult {
            symbol: market.symbol.clone(),
            score,
            rank: 0,
            ts_ms: market.ts_ms,
            market_data: market,
            filter_results,
            filter_details,
            score_components,
            levels,
            passed_all_filters: passed_all,
        }
    }

    fn filters_cached(&self, market: &MarketData, metrics: &ScanMetrics) -> FilterMap {
        let key = format!(
            "{}_{:.4}_{:.0}",
            market.symbol, market.price, market.volume_24h_usd
        );
        if let Some(hit) = self.filter_cache.lock().get(&key) {
            return hit;
        }

        let mut results = apply_liquidity_filters(&self.liquidity, market);
        results.extend(apply_volatility_filters(&self.volatility, market, metrics));
        results.extend(apply_correlation_filter(
            self.settings.correlation_limit,
            market,
        ));

        self.filter_cache.lock().insert(key, results.clone());
        results
    }

    fn score_cached(
        &self,
        market: &MarketData,
        metrics: &ScanMetrics,
    ) -> (f64, BTreeMap<String, f64>) {
        let key = format!(
            "{:.2}_{:.2}_{:.2}_{:.2}_{:.1}",
            metrics.vol_surge_1h,
            metrics.vol_surge_5m,
            metrics.atr_quality,
            market.btc_correlation,
            market.trades_per_minute
        );
        if let Some(hit) = self.score_cache.lock().get(&key) {
            return hit;
        }
        let scored = self.scorer.score(metrics);
        self.score_cache.lock().insert(key, scored.clone());
        scored
    }

    fn apply_symbol_filters(&self, markets: Vec<MarketData>) -> Vec<MarketData> {
        let mut filtered = markets;
        if let Some(whitelist) = &self.settings.symbol_whitelist {
            filtered.retain(|m| whitelist.contains(&m.symbol));
        }
        if let Some(blacklist) = &self.settings.symbol_blacklist {
            filtered.retain(|m| !blacklist.contains(&m.symbol));
        }
        filtered
    }

    fn apply_volume_cut(&self, mut markets: Vec<MarketData>) -> Vec<MarketData> {
        if let Some(top_n) = self.settings.top_n_by_volume {
            markets.sort_by(|a, b| {
                b.volume_24h_usd
                    .partial_cmp(&a.volume_24h_usd)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            markets.truncate(top_n);
        }
        markets
    }

    /// Batch size after the memory-pressure heuristic.
    fn effective_batch_size(&self, memory_pct: f32) -> usize {
        let base = self.settings.batch_size.max(1);
        if memory_pct > 85.0 {
            (base / 2).max(1)
        } else if memory_pct > 70.0 {
            (base * 3 / 4).max(1)
        } else {
            base
        }
    }
}
