//! Per-endpoint token bucket rate limiting.
//!
//! Buckets are sized from venue-published limits. A depleted bucket makes
//! callers queue on a sleep, never fail, unless they explicitly opt out
//! of waiting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{VenueError, VenueResult};

/// Token bucket for a single endpoint family.
#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Take one token, or return the wait until one is available.
    fn try_take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
    }
}

/// Registry of per-endpoint buckets.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    /// Buckets sized from the venue's published public/private limits.
    pub fn with_venue_defaults() -> Self {
        let mut buckets = HashMap::new();
        buckets.insert("market".to_string(), Bucket::new(120, 10.0));
        buckets.insert("kline".to_string(), Bucket::new(60, 5.0));
        buckets.insert("order".to_string(), Bucket::new(20, 5.0));
        buckets.insert("account".to_string(), Bucket::new(30, 2.0));
        Self {
            buckets: Arc::new(Mutex::new(buckets)),
        }
    }

    /// Register or resize an endpoint bucket.
    pub fn configure(&self, endpoint: &str, capacity: u32, refill_per_sec: f64) {
        self.buckets
            .lock()
            .insert(endpoint.to_string(), Bucket::new(capacity, refill_per_sec));
    }

    /// Acquire one token for `endpoint`.
    ///
    /// With `wait` the call queues (sleeps) until a token is available.
    /// Without it, a depleted bucket returns `RateLimitExceeded`.
    pub async fn acquire(&self, endpoint: &str, wait: bool) -> VenueResult<()> {
        loop {
            let outcome = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets
                    .entry(endpoint.to_string())
                    .or_insert_with(|| Bucket::new(60, 5.0));
                bucket.try_take()
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(delay) if wait => {
                    debug!(endpoint, delay_ms = delay.as_millis() as u64, "Rate limited, queueing");
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    warn!(endpoint, "Rate limit exceeded with wait=false");
                    return Err(VenueError::RateLimitExceeded {
                        endpoint: endpoint.to_string(),
                    });
                }
            }
        }
    }
}
