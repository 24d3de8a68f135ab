//! REST client for market data and order placement.
//!
//! Signed requests use HMAC-SHA256 over `timestamp + api_key +
//! recv_window + payload`, with the key material sent only as headers.
//! Every call goes through the per-endpoint rate limiter and transient
//! failures are retried with exponential backoff inside the client.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use bbot_core::{BookLevel, Candle, Order, OrderBookSnapshot, OrderStatus, OrderType, Symbol, TradeSide};

use crate::error::{VenueError, VenueResult};
use crate::execution::{AccountBalance, BoxFuture, ExecutionClient, OrderRequest};
use crate::rate_limit::RateLimiter;

type HmacSha256 = Hmac<Sha256>;

/// Static metadata for one tradeable market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketMeta {
    pub symbol: Symbol,
    pub tick_size: f64,
    pub qty_step: f64,
    pub min_qty: f64,
}

/// 24h ticker snapshot for one market.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerInfo {
    pub symbol: Symbol,
    pub last_price: f64,
    pub volume_24h_usd: f64,
    pub oi_usd: Option<f64>,
}

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub timeout_ms: u64,
    /// Retry budget for transient failures.
    pub max_retries: u32,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.venue.example".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            timeout_ms: 10_000,
            max_retries: 3,
        }
    }
}

/// Venue response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    list: Vec<RawInstrument>,
}

#[derive(Debug, Deserialize)]
struct RawInstrument {
    symbol: String,
    #[serde(rename = "tickSize")]
    tick_size: String,
    #[serde(rename = "qtyStep")]
    qty_step: String,
    #[serde(rename = "minOrderQty")]
    min_qty: String,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    list: Vec<RawTicker>,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "turnover24h")]
    turnover_24h: String,
    #[serde(rename = "openInterestValue", default)]
    open_interest_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    /// Rows newest-first: [start, open, high, low, close, volume, ...].
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct BookResult {
    b: Vec<[String; 2]>,
    a: Vec<[String; 2]>,
    u: u64,
    ts: i64,
}

#[derive(Debug, Deserialize)]
struct OiResult {
    list: Vec<RawOi>,
}

#[derive(Debug, Deserialize)]
struct RawOi {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    list: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    #[serde(rename = "totalEquity")]
    total_equity: String,
    #[serde(rename = "totalAvailableBalance")]
    available: String,
}

#[derive(Debug, Deserialize)]
struct OrderResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

fn parse_f64(s: &str, what: &str) -> VenueResult<f64> {
    s.parse()
        .map_err(|_| VenueError::Parse(format!("{what}: {s}")))
}

/// REST client with HMAC request signing.
pub struct RestClient {
    config: RestConfig,
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl RestClient {
    pub fn new(config: RestConfig, limiter: RateLimiter) -> VenueResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| VenueError::Network(e.to_string()))?;
        Ok(Self {
            config,
            http,
            limiter,
        })
    }

    /// HMAC-SHA256 hex signature of the canonical payload.
    fn sign(&self, timestamp_ms: i64, payload: &str) -> String {
        let canonical = format!(
            "{}{}{}{}",
            timestamp_ms, self.config.api_key, self.config.recv_window_ms, payload
        );
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        query: &str,
    ) -> VenueResult<T> {
        self.request(endpoint, reqwest::Method::GET, path, query, None)
            .await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        body: serde_json::Value,
    ) -> VenueResult<T> {
        self.request(endpoint, reqwest::Method::POST, path, "", Some(body))
            .await
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        method: reqwest::Method,
        path: &str,
        query: &str,
        body: Option<serde_json::Value>,
    ) -> VenueResult<T> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire(endpoint, true).await?;

            match self
                .request_once(method.clone(), path, query, body.as_ref())
                .await
            {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(250u64.saturating_mul(1 << attempt.min(5)));
                    warn!(?e, attempt, delay_ms = delay.as_millis() as u64, path, "Retrying venue call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &str,
        body: Option<&serde_json::Value>,
    ) -> VenueResult<T> {
        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}{}?{}", self.config.base_url, path, query)
        };

        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let payload = match body {
            Some(b) => b.to_string(),
            None => query.to_string(),
        };
        let signature = self.sign(timestamp_ms, &payload);

        let mut request = self
            .http
            .request(method, &url)
            .header("X-BAPI-API-KEY", &self.config.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp_ms.to_string())
            .header("X-BAPI-RECV-WINDOW", self.config.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature);
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request.send().await?;
        let envelope: Envelope<T> = response.json().await?;

        match envelope.ret_code {
            0 => envelope
                .result
                .ok_or_else(|| VenueError::Parse("missing result".to_string())),
            10003 | 10004 | 33004 => Err(VenueError::Auth(envelope.ret_msg)),
            10006 => Err(VenueError::RateLimitExceeded {
                endpoint: path.to_string(),
            }),
            code if (10001..=10099).contains(&code) => Err(VenueError::BadRequest(envelope.ret_msg)),
            code => Err(VenueError::Exchange {
                code,
                message: envelope.ret_msg,
            }),
        }
    }

    /// All linear perpetual instruments with their precision steps.
    pub async fn fetch_markets(&self) -> VenueResult<Vec<MarketMeta>> {
        let result: InstrumentsResult = self
            .get("market", "/v5/market/instruments-info", "category=linear")
            .await?;

        let mut markets = Vec::with_capacity(result.list.len());
        for raw in &result.list {
            markets.push(MarketMeta {
                symbol: Symbol::new(&raw.symbol),
                tick_size: parse_f64(&raw.tick_size, "tickSize")?,
                qty_step: parse_f64(&raw.qty_step, "qtyStep")?,
                min_qty: parse_f64(&raw.min_qty, "minOrderQty")?,
            });
        }
        debug!(count = markets.len(), "Fetched markets");
        Ok(markets)
    }

    /// 24h ticker stats for every linear perpetual.
    pub async fn fetch_tickers(&self) -> VenueResult<Vec<TickerInfo>> {
        let result: TickersResult = self
            .get("market", "/v5/market/tickers", "category=linear")
            .await?;
        let mut tickers = Vec::with_capacity(result.list.len());
        for raw in &result.list {
            let oi_usd = match &raw.open_interest_value {
                Some(s) if !s.is_empty() => Some(parse_f64(s, "openInterestValue")?),
                _ => None,
            };
            tickers.push(TickerInfo {
                symbol: Symbol::new(&raw.symbol),
                last_price: parse_f64(&raw.last_price, "lastPrice")?,
                volume_24h_usd: parse_f64(&raw.turnover_24h, "turnover24h")?,
                oi_usd,
            });
        }
        Ok(tickers)
    }

    /// OHLCV bars, oldest first.
    pub async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
        limit: u32,
        since_ms: Option<i64>,
    ) -> VenueResult<Vec<Candle>> {
        let mut query = format!(
            "category=linear&symbol={symbol}&interval={interval_minutes}&limit={limit}"
        );
        if let Some(since) = since_ms {
            query.push_str(&format!("&start={since}"));
        }
        let result: KlineResult = self.get("kline", "/v5/market/kline", &query).await?;

        let mut candles = Vec::with_capacity(result.list.len());
        for row in result.list.iter().rev() {
            if row.len() < 6 {
                return Err(VenueError::Parse(format!("short kline row: {row:?}")));
            }
            candles.push(Candle::new(
                row[0]
                    .parse()
                    .map_err(|_| VenueError::Parse(format!("kline ts: {}", row[0])))?,
                parse_f64(&row[1], "kline open")?,
                parse_f64(&row[2], "kline high")?,
                parse_f64(&row[3], "kline low")?,
                parse_f64(&row[4], "kline close")?,
                parse_f64(&row[5], "kline volume")?,
            ));
        }
        Ok(candles)
    }

    /// One-shot order book snapshot, used for seeding and resync.
    pub async fn fetch_order_book(
        &self,
        symbol: &Symbol,
        depth: u32,
    ) -> VenueResult<OrderBookSnapshot> {
        let query = format!("category=linear&symbol={symbol}&limit={depth}");
        let result: BookResult = self.get("market", "/v5/market/orderbook", &query).await?;

        let parse_side = |raw: &[[String; 2]]| -> VenueResult<Vec<BookLevel>> {
            raw.iter()
                .map(|pair| {
                    Ok(BookLevel::new(
                        parse_f64(&pair[0], "book price")?,
                        parse_f64(&pair[1], "book size")?,
                    ))
                })
                .collect()
        };

        Ok(OrderBookSnapshot::new(
            result.ts,
            parse_side(&result.b)?,
            parse_side(&result.a)?,
            result.u,
        ))
    }

    /// Latest open interest in contracts.
    pub async fn fetch_open_interest(&self, symbol: &Symbol) -> VenueResult<Option<f64>> {
        let query = format!("category=linear&symbol={symbol}&intervalTime=5min&limit=1");
        let result: OiResult = self
            .get("market", "/v5/market/open-interest", &query)
            .await?;
        match result.list.first() {
            Some(raw) => Ok(Some(parse_f64(&raw.open_interest, "openInterest")?)),
            None => Ok(None),
        }
    }

    async fn fetch_balance_inner(&self) -> VenueResult<AccountBalance> {
        let result: BalanceResult = self
            .get("account", "/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;
        let raw = result
            .list
            .first()
            .ok_or_else(|| VenueError::Parse("empty balance list".to_string()))?;
        Ok(AccountBalance {
            equity_usd: parse_f64(&raw.total_equity, "totalEquity")?,
            available_usd: parse_f64(&raw.available, "totalAvailableBalance")?,
        })
    }

    async fn place_order_inner(&self, request: OrderRequest) -> VenueResult<Order> {
        if request.qty <= 0.0 {
            return Err(VenueError::BadRequest(format!(
                "non-positive qty: {}",
                request.qty
            )));
        }
        let side = match request.side {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        };
        let order_type = match request.order_type {
            OrderType::Market => "Market",
            OrderType::Limit => "Limit",
        };
        let mut body = json!({
            "category": "linear",
            "symbol": request.symbol.as_str(),
            "side": side,
            "orderType": order_type,
            "qty": request.qty.to_string(),
            "reduceOnly": request.reduce_only,
        });
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            body["price"] = json!(price.to_string());
        }

        let result: OrderResult = self.post("order", "/v5/order/create", body).await?;
        let now = chrono::Utc::now().timestamp_millis();

        Ok(Order {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: request.position_id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            qty: request.qty,
            price: request.price,
            status: OrderStatus::Open,
            filled_qty: 0.0,
            avg_fill_price: None,
            fees_usd: 0.0,
            created_at_ms: now,
            filled_at_ms: None,
            exchange_id: Some(result.order_id),
            reduce_only: request.reduce_only,
        })
    }

    async fn cancel_order_inner(&self, symbol: &Symbol, order_id: &str) -> VenueResult<()> {
        let body = json!({
            "category": "linear",
            "symbol": symbol.as_str(),
            "orderId": order_id,
        });
        let _: OrderResult = self.post("order", "/v5/order/cancel", body).await?;
        Ok(())
    }
}

impl ExecutionClient for RestClient {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<Order>> {
        Box::pin(self.place_order_inner(request))
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        order_id: &'a str,
    ) -> BoxFuture<'a, VenueResult<()>> {
        Box::pin(self.cancel_order_inner(symbol, order_id))
    }

    fn fetch_balance(&self) -> BoxFuture<'_, VenueResult<AccountBalance>> {
        Box::pin(self.fetch_balance_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_hex() {
        let client = RestClient::new(
            RestConfig {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                ..Default::default()
            },
            RateLimiter::with_venue_defaults(),
        )
        .unwrap();

        let a = client.sign(1_700_000_000_000, "category=linear");
        let b = client.sign(1_700_000_000_000, "category=linear");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_varies_with_payload() {
        let client = RestClient::new(
            RestConfig {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                ..Default::default()
            },
            RateLimiter::with_venue_defaults(),
        )
        .unwrap();
        assert_ne!(
            client.sign(1, "a=1"),
            client.sign(1, "a=2"),
        );
    }
}
