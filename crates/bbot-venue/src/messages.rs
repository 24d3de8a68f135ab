//! Wire-level message contracts and normalisation.
//!
//! The venue publishes `publicTrade.SYMBOL` entries shaped `{i,T,p,v,S}`
//! and `orderbook.N.SYMBOL` frames shaped `{b,a,u}` with a top-level
//! `type` of `snapshot` or `delta`. Everything is normalised here into
//! the core model before any other component sees it.

use serde::Deserialize;

use bbot_core::{BookLevel, Symbol, Trade, TradeSide};

use crate::error::{VenueError, VenueResult};

/// Topic for the public trade stream of a symbol.
pub fn trade_topic(symbol: &Symbol) -> String {
    format!("publicTrade.{symbol}")
}

/// Topic for the L2 book stream of a symbol at `depth` levels.
pub fn book_topic(symbol: &Symbol, depth: u32) -> String {
    format!("orderbook.{depth}.{symbol}")
}

/// Symbol parsed back out of a stream topic.
pub fn symbol_from_topic(topic: &str) -> Option<Symbol> {
    topic.rsplit('.').next().map(Symbol::new)
}

/// Envelope of every data frame from the venue stream.
#[derive(Debug, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(rename = "type", default)]
    pub frame_type: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Subscription ack fields.
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub ret_msg: Option<String>,
}

/// One raw trade entry: `{i, T, p, v, S}`.
#[derive(Debug, Deserialize)]
pub struct RawTrade {
    #[serde(rename = "i")]
    pub id: String,
    #[serde(rename = "T")]
    pub ts_ms: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "v")]
    pub amount: String,
    #[serde(rename = "S")]
    pub side: String,
}

impl RawTrade {
    /// Normalise to the core trade type.
    pub fn normalise(&self) -> VenueResult<Trade> {
        let price: f64 = self
            .price
            .parse()
            .map_err(|_| VenueError::Parse(format!("trade price: {}", self.price)))?;
        let amount: f64 = self
            .amount
            .parse()
            .map_err(|_| VenueError::Parse(format!("trade amount: {}", self.amount)))?;
        let side = match self.side.as_str() {
            "Buy" | "buy" => TradeSide::Buy,
            "Sell" | "sell" => TradeSide::Sell,
            other => return Err(VenueError::Parse(format!("trade side: {other}"))),
        };
        Ok(Trade::new(self.ts_ms, price, amount, side))
    }
}

/// Raw book frame body: `{b: [[p,v]], a: [[p,v]], u}`.
#[derive(Debug, Deserialize)]
pub struct RawBook {
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
    #[serde(rename = "u")]
    pub update_id: u64,
}

fn parse_levels(raw: &[[String; 2]]) -> VenueResult<Vec<BookLevel>> {
    raw.iter()
        .map(|pair| {
            let price: f64 = pair[0]
                .parse()
                .map_err(|_| VenueError::Parse(format!("book price: {}", pair[0])))?;
            let size: f64 = pair[1]
                .parse()
                .map_err(|_| VenueError::Parse(format!("book size: {}", pair[1])))?;
            Ok(BookLevel::new(price, size))
        })
        .collect()
}

/// A normalised book message, snapshot or delta.
///
/// Delta levels with size 0 delete the price from the book.
#[derive(Debug, Clone, PartialEq)]
pub enum BookMessage {
    Snapshot {
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        update_id: u64,
    },
    Delta {
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        update_id: u64,
    },
}

impl BookMessage {
    pub fn update_id(&self) -> u64 {
        match self {
            Self::Snapshot { update_id, .. } | Self::Delta { update_id, .. } => *update_id,
        }
    }
}

/// Events emitted by the stream consumer.
#[derive(Debug)]
pub enum WsEvent {
    Connected,
    Disconnected { reason: String },
    Trade { symbol: Symbol, trade: Trade },
    Book { symbol: Symbol, message: BookMessage },
    SubscriptionAck { success: bool, message: String },
}

/// Parse one text frame into zero or more events.
pub fn parse_frame(text: &str) -> VenueResult<Vec<WsEvent>> {
    let frame: StreamFrame = serde_json::from_str(text)?;

    // Subscription / op acks carry no topic.
    if let Some(op) = &frame.op {
        if op == "subscribe" || op == "unsubscribe" {
            return Ok(vec![WsEvent::SubscriptionAck {
                success: frame.success.unwrap_or(false),
                message: frame.ret_msg.unwrap_or_default(),
            }]);
        }
        // Ping replies and other ops are not surfaced.
        return Ok(vec![]);
    }

    let (topic, data) = match (&frame.topic, &frame.data) {
        (Some(t), Some(d)) => (t.as_str(), d),
        _ => return Ok(vec![]),
    };
    let symbol = symbol_from_topic(topic)
        .ok_or_else(|| VenueError::Parse(format!("topic without symbol: {topic}")))?;

    if topic.starts_with("publicTrade.") {
        let raw: Vec<RawTrade> = serde_json::from_value(data.clone())?;
        let mut events = Vec::with_capacity(raw.len());
        for entry in &raw {
            events.push(WsEvent::Trade {
                symbol: symbol.clone(),
                trade: entry.normalise()?,
            });
        }
        return Ok(events);
    }

    if topic.starts_with("orderbook.") {
        let raw: RawBook = serde_json::from_value(data.clone())?;
        let bids = parse_levels(&raw.bids)?;
        let asks = parse_levels(&raw.asks)?;
        let message = match frame.frame_type.as_deref() {
            Some("snapshot") => BookMessage::Snapshot {
                bids,
                asks,
                update_id: raw.update_id,
            },
            Some("delta") => BookMessage::Delta {
                bids,
                asks,
                update_id: raw.update_id,
            },
            other => {
                return Err(VenueError::Parse(format!(
                    "unknown book frame type: {other:?}"
                )))
            }
        };
        return Ok(vec![WsEvent::Book { symbol, message }]);
    }

    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_frame_normalises() {
        let text = r#"{
            "topic": "publicTrade.BTCUSDT",
            "type": "snapshot",
            "data": [
                {"i": "t1", "T": 1700000000000, "p": "42000.5", "v": "0.25", "S": "Buy"},
                {"i": "t2", "T": 1700000000100, "p": "42000.0", "v": "0.10", "S": "Sell"}
            ]
        }"#;
        let events = parse_frame(text).unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            WsEvent::Trade { symbol, trade } => {
                assert_eq!(symbol.as_str(), "BTCUSDT");
                assert_eq!(trade.side, TradeSide::Buy);
                assert!((trade.price - 42000.5).abs() < 1e-9);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_book_delta_zero_size_levels_survive_parse() {
        let text = r#"{
            "topic": "orderbook.50.ETHUSDT",
            "type": "delta",
            "data": {"b": [["2000.0", "0"]], "a": [["2001.0", "3.5"]], "u": 42}
        }"#;
        let events = parse_frame(text).unwrap();
        match &events[0] {
            WsEvent::Book { message, .. } => {
                assert_eq!(message.update_id(), 42);
                match message {
                    BookMessage::Delta { bids, .. } => assert_eq!(bids[0].size, 0.0),
                    _ => panic!("expected delta"),
                }
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_bad_side_is_parse_error() {
        let raw = RawTrade {
            id: "x".into(),
            ts_ms: 0,
            price: "1.0".into(),
            amount: "1.0".into(),
            side: "Hold".into(),
        };
        assert!(matches!(raw.normalise(), Err(VenueError::Parse(_))));
    }

    #[test]
    fn test_subscription_ack() {
        let text = r#"{"op": "subscribe", "success": true, "ret_msg": ""}"#;
        let events = parse_frame(text).unwrap();
        assert!(matches!(
            events[0],
            WsEvent::SubscriptionAck { success: true, .. }
        ));
    }
}
