//! Typed payloads for the event codes the gateway emits.
//!
//! The dispatcher hands handlers a generic [`Message`](super::Message); call
//! [`Message::decode`](super::Message::decode) with one of these types when a
//! strongly-typed view is wanted:
//!
//! ```
//! use polygon_stream::types::{Message, events::TradeEvent};
//! use serde_json::json;
//!
//! let msg = Message::new("T", json!({"sym": "AMD", "p": 101.5, "s": 100, "t": 1611082428813i64}));
//! let trade: TradeEvent = msg.decode().unwrap();
//! assert_eq!(trade.symbol, "AMD");
//! assert_eq!(trade.size, Some(100.0));
//! ```
//!
//! Field names follow the single-letter wire keys via `#[serde(rename)]`;
//! every field the gateway may omit is optional. Timestamps are Unix
//! milliseconds; `timestamp()` converts them to `chrono::DateTime<Utc>`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Convert a Unix-millisecond timestamp to UTC.
pub fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

macro_rules! impl_timestamp {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl $ty {
                /// Event time as UTC, if present and in range.
                pub fn timestamp(&self) -> Option<DateTime<Utc>> {
                    self.$field.and_then(millis_to_utc)
                }
            }
        )*
    };
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// A `status` control message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusEvent {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Stocks and options
// ---------------------------------------------------------------------------

/// Trade (`T`) on the stocks or options cluster.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "x", default)]
    pub exchange: Option<i64>,
    #[serde(rename = "i", default)]
    pub trade_id: Option<String>,
    #[serde(rename = "z", default)]
    pub tape: Option<i64>,
    #[serde(rename = "p", default)]
    pub price: Option<f64>,
    #[serde(rename = "s", default)]
    pub size: Option<f64>,
    #[serde(rename = "c", default)]
    pub conditions: Vec<i64>,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(rename = "q", default)]
    pub sequence: Option<i64>,
}

/// NBBO quote (`Q`) on the stocks or options cluster.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuoteEvent {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "bx", default)]
    pub bid_exchange: Option<i64>,
    #[serde(rename = "bp", default)]
    pub bid_price: Option<f64>,
    #[serde(rename = "bs", default)]
    pub bid_size: Option<f64>,
    #[serde(rename = "ax", default)]
    pub ask_exchange: Option<i64>,
    #[serde(rename = "ap", default)]
    pub ask_price: Option<f64>,
    #[serde(rename = "as", default)]
    pub ask_size: Option<f64>,
    #[serde(rename = "c", default)]
    pub condition: Option<i64>,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(rename = "q", default)]
    pub sequence: Option<i64>,
    #[serde(rename = "z", default)]
    pub tape: Option<i64>,
}

/// Minute (`AM`) or second (`A`) aggregate bar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregateEvent {
    pub ev: String,
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "v", default)]
    pub volume: Option<f64>,
    #[serde(rename = "av", default)]
    pub accumulated_volume: Option<f64>,
    #[serde(rename = "op", default)]
    pub official_open: Option<f64>,
    #[serde(rename = "vw", default)]
    pub vwap: Option<f64>,
    #[serde(rename = "o", default)]
    pub open: Option<f64>,
    #[serde(rename = "c", default)]
    pub close: Option<f64>,
    #[serde(rename = "h", default)]
    pub high: Option<f64>,
    #[serde(rename = "l", default)]
    pub low: Option<f64>,
    #[serde(rename = "a", default)]
    pub day_vwap: Option<f64>,
    #[serde(rename = "z", default)]
    pub average_trade_size: Option<f64>,
    #[serde(rename = "s", default)]
    pub start_ms: Option<i64>,
    #[serde(rename = "e", default)]
    pub end_ms: Option<i64>,
}

/// Limit-up / limit-down band (`LULD`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LuldEvent {
    #[serde(rename = "T")]
    pub symbol: String,
    #[serde(rename = "h", default)]
    pub high_limit: Option<f64>,
    #[serde(rename = "l", default)]
    pub low_limit: Option<f64>,
    #[serde(rename = "i", default)]
    pub indicators: Vec<i64>,
    #[serde(rename = "z", default)]
    pub tape: Option<i64>,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(rename = "q", default)]
    pub sequence: Option<i64>,
}

/// Net order imbalance (`NOI`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImbalanceEvent {
    #[serde(rename = "T")]
    pub symbol: String,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(rename = "at", default)]
    pub auction_time: Option<i64>,
    #[serde(rename = "a", default)]
    pub auction_type: Option<String>,
    #[serde(rename = "i", default)]
    pub symbol_sequence: Option<i64>,
    #[serde(rename = "x", default)]
    pub exchange: Option<i64>,
    #[serde(rename = "o", default)]
    pub imbalance_quantity: Option<f64>,
    #[serde(rename = "p", default)]
    pub paired_quantity: Option<f64>,
    #[serde(rename = "b", default)]
    pub book_clearing_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Forex
// ---------------------------------------------------------------------------

/// Forex quote (`C`). The pair arrives under `p`, e.g. `USD/CNH`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForexQuoteEvent {
    #[serde(rename = "p")]
    pub pair: String,
    #[serde(rename = "x", default)]
    pub exchange: Option<i64>,
    #[serde(rename = "a", default)]
    pub ask: Option<f64>,
    #[serde(rename = "b", default)]
    pub bid: Option<f64>,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
}

/// Forex minute aggregate (`CA`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForexAggregateEvent {
    pub pair: String,
    #[serde(rename = "o", default)]
    pub open: Option<f64>,
    #[serde(rename = "c", default)]
    pub close: Option<f64>,
    #[serde(rename = "h", default)]
    pub high: Option<f64>,
    #[serde(rename = "l", default)]
    pub low: Option<f64>,
    #[serde(rename = "v", default)]
    pub volume: Option<f64>,
    #[serde(rename = "s", default)]
    pub start_ms: Option<i64>,
    #[serde(rename = "e", default)]
    pub end_ms: Option<i64>,
}

// ---------------------------------------------------------------------------
// Crypto
// ---------------------------------------------------------------------------

/// Crypto trade (`XT`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CryptoTradeEvent {
    pub pair: String,
    #[serde(rename = "p", default)]
    pub price: Option<f64>,
    #[serde(rename = "s", default)]
    pub size: Option<f64>,
    #[serde(rename = "c", default)]
    pub conditions: Vec<i64>,
    #[serde(rename = "i", default)]
    pub trade_id: Option<String>,
    #[serde(rename = "x", default)]
    pub exchange: Option<i64>,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(rename = "r", default)]
    pub received_ms: Option<i64>,
}

/// Crypto quote (`XQ`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CryptoQuoteEvent {
    pub pair: String,
    #[serde(rename = "bp", default)]
    pub bid_price: Option<f64>,
    #[serde(rename = "bs", default)]
    pub bid_size: Option<f64>,
    #[serde(rename = "ap", default)]
    pub ask_price: Option<f64>,
    #[serde(rename = "as", default)]
    pub ask_size: Option<f64>,
    #[serde(rename = "x", default)]
    pub exchange: Option<i64>,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(rename = "r", default)]
    pub received_ms: Option<i64>,
}

/// Crypto level-2 book snapshot (`XL2`). Levels are `[price, size]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CryptoLevel2Event {
    pub pair: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<[f64; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[f64; 2]>,
    #[serde(rename = "x", default)]
    pub exchange: Option<i64>,
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(rename = "r", default)]
    pub received_ms: Option<i64>,
}

/// Crypto minute aggregate (`XA`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CryptoAggregateEvent {
    pub pair: String,
    #[serde(rename = "o", default)]
    pub open: Option<f64>,
    #[serde(rename = "c", default)]
    pub close: Option<f64>,
    #[serde(rename = "h", default)]
    pub high: Option<f64>,
    #[serde(rename = "l", default)]
    pub low: Option<f64>,
    #[serde(rename = "v", default)]
    pub volume: Option<f64>,
    #[serde(rename = "vw", default)]
    pub vwap: Option<f64>,
    #[serde(rename = "s", default)]
    pub start_ms: Option<i64>,
    #[serde(rename = "e", default)]
    pub end_ms: Option<i64>,
}

impl_timestamp!(
    TradeEvent => timestamp_ms,
    QuoteEvent => timestamp_ms,
    AggregateEvent => start_ms,
    LuldEvent => timestamp_ms,
    ImbalanceEvent => timestamp_ms,
    ForexQuoteEvent => timestamp_ms,
    ForexAggregateEvent => start_ms,
    CryptoTradeEvent => timestamp_ms,
    CryptoQuoteEvent => timestamp_ms,
    CryptoLevel2Event => timestamp_ms,
    CryptoAggregateEvent => start_ms,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use chrono::{Datelike, Timelike};

    fn frame(raw: &str) -> Vec<Message> {
        Message::parse_frame(raw).unwrap()
    }

    #[test]
    fn decodes_stock_quote() {
        let msgs = frame(
            r#"[{"ev":"Q","sym":"MSFT","bx":4,"bp":114.125,"bs":100,"ax":7,"ap":114.128,"as":160,"c":0,"t":1536036818784,"q":50385480,"z":3}]"#,
        );
        let quote: QuoteEvent = msgs[0].decode().unwrap();
        assert_eq!(quote.symbol, "MSFT");
        assert_eq!(quote.ask_size, Some(160.0));
        let ts = quote.timestamp().unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2018, 9, 4));
        assert_eq!(ts.hour(), 4);
    }

    #[test]
    fn decodes_minute_aggregate_with_ev() {
        let msgs = frame(
            r#"[{"ev":"AM","sym":"GTE","v":4110,"av":9470157,"op":0.4372,"vw":0.4488,"o":0.4488,"c":0.4486,"h":0.4489,"l":0.4486,"a":0.4352,"z":685,"s":1610144640000,"e":1610144700000}]"#,
        );
        let agg: AggregateEvent = msgs[0].decode().unwrap();
        assert_eq!(agg.ev, "AM");
        assert_eq!(agg.volume, Some(4110.0));
        assert_eq!(agg.end_ms, Some(1610144700000));
    }

    #[test]
    fn decodes_crypto_level2() {
        let msgs = frame(
            r#"[{"ev":"XL2","pair":"BTC-USD","t":1598045316750,"x":1,"b":[[11700.1,0.5],[11700.0,1.2]],"a":[[11701.0,0.3]]}]"#,
        );
        let book: CryptoLevel2Event = msgs[0].decode().unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks[0], [11701.0, 0.3]);
    }

    #[test]
    fn decodes_forex_quote_pair() {
        let msgs = frame(r#"[{"ev":"C","p":"USD/CNH","x":44,"a":6.83366,"b":6.83363,"t":1536036818784}]"#);
        let quote: ForexQuoteEvent = msgs[0].decode().unwrap();
        assert_eq!(quote.pair, "USD/CNH");
        assert_eq!(msgs[0].symbol(), Some("USD/CNH"));
    }

    #[test]
    fn decodes_status() {
        let msgs = frame(r#"[{"ev":"status","status":"auth_failed","message":"authentication failed"}]"#);
        let status: StatusEvent = msgs[0].decode().unwrap();
        assert_eq!(status.status, "auth_failed");
        assert_eq!(status.message.as_deref(), Some("authentication failed"));
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let msgs = frame(r#"[{"ev":"T","p":1.0}]"#);
        assert!(msgs[0].decode::<TradeEvent>().is_err());
    }
}
