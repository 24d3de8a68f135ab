//! WebSocket stream client.
//!
//! One connection per public stream family. Handles the connection
//! lifecycle, keepalive pings, reconnection with exponential backoff
//! capped at 60 s, and subscription restoration in batches of at most
//! 10 topics with inter-batch pacing. Subscriptions requested while
//! disconnected queue up and flush after the next connect.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{VenueError, VenueResult};
use crate::messages::{parse_frame, WsEvent};

/// Maximum topics per subscribe request.
const SUBSCRIBE_BATCH_SIZE: usize = 10;

/// Pacing between subscribe batches.
const SUBSCRIBE_BATCH_PAUSE: Duration = Duration::from_millis(150);

/// Consecutive unparseable frames on one topic before it is dropped.
const PARSE_CIRCUIT_BREAKER: u32 = 5;

/// Stream connection configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub ping_interval_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
            ping_interval_ms: 20_000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Commands from subscription handles into the run loop.
#[derive(Debug)]
enum WsCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Cheap handle for requesting subscriptions.
#[derive(Clone)]
pub struct WsHandle {
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    state: Arc<RwLock<WsState>>,
}

impl WsHandle {
    /// Request topics. Queued and flushed post-connect when offline.
    pub fn subscribe(&self, topics: Vec<String>) {
        let _ = self.cmd_tx.send(WsCommand::Subscribe(topics));
    }

    pub fn unsubscribe(&self, topics: Vec<String>) {
        let _ = self.cmd_tx.send(WsCommand::Unsubscribe(topics));
    }

    pub fn state(&self) -> WsState {
        *self.state.read()
    }
}

/// WebSocket client driving one stream connection.
pub struct WsClient {
    config: WsConfig,
    event_tx: mpsc::Sender<WsEvent>,
    cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    state: Arc<RwLock<WsState>>,
    /// All topics that must be live after any (re)connect.
    desired_topics: BTreeSet<String>,
    /// Consecutive parse failures per topic.
    parse_failures: std::collections::HashMap<String, u32>,
}

impl WsClient {
    pub fn new(config: WsConfig, event_tx: mpsc::Sender<WsEvent>) -> (Self, WsHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(WsState::Disconnected));
        let handle = WsHandle {
            cmd_tx,
            state: state.clone(),
        };
        (
            Self {
                config,
                event_tx,
                cmd_rx,
                state,
                desired_topics: BTreeSet::new(),
                parse_failures: std::collections::HashMap::new(),
            },
            handle,
        )
    }

    /// Run the connection loop until the event receiver drops or the
    /// reconnect budget is exhausted.
    pub async fn run(mut self) -> VenueResult<()> {
        let mut attempt = 0u32;

        loop {
            *self.state.write() = WsState::Connecting;

            match self.run_connection().await {
                Ok(()) => {
                    info!("WebSocket connection closed");
                    return Ok(());
                }
                Err(VenueError::ChannelClosed) => {
                    info!("Event receiver dropped, stopping stream client");
                    return Ok(());
                }
                Err(e) => {
                    error!(?e, "WebSocket connection error");
                }
            }

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                return Err(VenueError::Network(
                    "max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = WsState::Reconnecting;
            let _ = self
                .event_tx
                .send(WsEvent::Disconnected {
                    reason: format!("reconnect attempt {attempt}"),
                })
                .await;

            // Requests made while offline still land in desired_topics.
            self.absorb_pending_commands();

            let delay = self.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Exponential backoff, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay = self
            .config
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exp.min(6));
        Duration::from_millis(delay.min(self.config.reconnect_max_delay_ms))
    }

    async fn run_connection(&mut self) -> VenueResult<()> {
        info!(url = %self.config.url, "Connecting to WebSocket");
        let (ws_stream, _response) = connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = WsState::Connected;
        info!("WebSocket connected");
        self.event_tx
            .send(WsEvent::Connected)
            .await
            .map_err(|_| VenueError::ChannelClosed)?;

        // Restore every desired topic in paced batches.
        let topics: Vec<String> = self.desired_topics.iter().cloned().collect();
        if !topics.is_empty() {
            info!(count = topics.len(), "Restoring subscriptions");
            for batch in topics.chunks(SUBSCRIBE_BATCH_SIZE) {
                let request = json!({"op": "subscribe", "args": batch});
                write.send(Message::Text(request.to_string())).await?;
                tokio::time::sleep(SUBSCRIBE_BATCH_PAUSE).await;
            }
        }

        let mut ping_interval =
            tokio::time::interval(Duration::from_millis(self.config.ping_interval_ms));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(VenueError::WsClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Err(VenueError::Network("stream ended".to_string()));
                        }
                        _ => {}
                    }
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Subscribe(topics)) => {
                            for topic in &topics {
                                self.desired_topics.insert(topic.clone());
                            }
                            for batch in topics.chunks(SUBSCRIBE_BATCH_SIZE) {
                                let request = json!({"op": "subscribe", "args": batch});
                                write.send(Message::Text(request.to_string())).await?;
                                tokio::time::sleep(SUBSCRIBE_BATCH_PAUSE).await;
                            }
                        }
                        Some(WsCommand::Unsubscribe(topics)) => {
                            for topic in &topics {
                                self.desired_topics.remove(topic);
                            }
                            for batch in topics.chunks(SUBSCRIBE_BATCH_SIZE) {
                                let request = json!({"op": "unsubscribe", "args": batch});
                                write.send(Message::Text(request.to_string())).await?;
                            }
                        }
                        None => {
                            // All handles dropped; keep streaming for the
                            // event consumer until it drops too.
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    let ping = json!({"op": "ping"});
                    write.send(Message::Text(ping.to_string())).await?;
                    debug!("Sent keepalive ping");
                }
            }
        }
    }

    async fn handle_text(&mut self, text: &str) -> VenueResult<()> {
        let events = match parse_frame(text) {
            Ok(events) => {
                // A clean frame resets its topic's failure streak.
                if let Some(topic) = topic_of(text) {
                    self.parse_failures.remove(&topic);
                }
                events
            }
            Err(e) => {
                // A malformed frame is logged and skipped, not fatal.
                // Repeated failures on one topic drop the topic so a
                // misbehaving symbol cannot spam the log forever.
                debug!(?e, "Dropping unparseable frame");
                if let Some(topic) = topic_of(text) {
                    let count = self.parse_failures.entry(topic.clone()).or_insert(0);
                    *count += 1;
                    if *count >= PARSE_CIRCUIT_BREAKER {
                        warn!(%topic, failures = *count, "Circuit breaking topic");
                        self.desired_topics.remove(&topic);
                        self.parse_failures.remove(&topic);
                    }
                }
                return Ok(());
            }
        };
        for event in events {
            if let WsEvent::SubscriptionAck { success, message } = &event {
                if !success {
                    warn!(%message, "Subscription rejected");
                }
                continue;
            }
            self.event_tx
                .send(event)
                .await
                .map_err(|_| VenueError::ChannelClosed)?;
        }
        Ok(())
    }
}

/// Process commands while disconnected: topics accumulate in
/// `desired_topics` so the next connect restores them.
impl WsClient {
    /// Drain queued commands without a live socket. Used between
    /// reconnect attempts so requests made while offline are not lost.
    pub fn absorb_pending_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                WsCommand::Subscribe(topics) => {
                    self.desired_topics.extend(topics);
                }
                WsCommand::Unsubscribe(topics) => {
                    for t in &topics {
                        self.desired_topics.remove(t);
                    }
                }
            }
        }
    }
}

/// Best-effort topic extraction from a raw frame.
fn topic_of(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("topic")?.as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_caps_at_configured_max() {
        let (client, _handle) = WsClient::new(
            WsConfig {
                reconnect_base_delay_ms: 1000,
                reconnect_max_delay_ms: 60_000,
                ..Default::default()
            },
            mpsc::channel(8).0,
        );
        assert_eq!(client.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(client.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(client.backoff_delay(20), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_parse_circuit_breaker_drops_topic() {
        let (mut client, _handle) = WsClient::new(WsConfig::default(), mpsc::channel(8).0);
        let topic = "publicTrade.BADUSDT".to_string();
        client.desired_topics.insert(topic.clone());

        let bad = r#"{"topic":"publicTrade.BADUSDT","type":"snapshot",
            "data":[{"i":"1","T":1,"p":"oops","v":"1","S":"Buy"}]}"#;
        for _ in 0..PARSE_CIRCUIT_BREAKER {
            client.handle_text(bad).await.unwrap();
        }
        assert!(!client.desired_topics.contains(&topic));
    }

    #[tokio::test]
    async fn test_offline_subscriptions_queue() {
        let (mut client, handle) = WsClient::new(WsConfig::default(), mpsc::channel(8).0);
        handle.subscribe(vec!["publicTrade.BTCUSDT".to_string()]);
        handle.subscribe(vec!["orderbook.50.BTCUSDT".to_string()]);
        client.absorb_pending_commands();
        assert_eq!(client.desired_topics.len(), 2);

        handle.unsubscribe(vec!["publicTrade.BTCUSDT".to_string()]);
        client.absorb_pending_commands();
        assert_eq!(client.desired_topics.len(), 1);
    }
}
