//! Enums that map directly to Polygon.io streaming wire values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{DELAYED_HOST, OPTION_SYMBOL_PREFIX, REAL_TIME_HOST};

// ---------------------------------------------------------------------------
// Stream Cluster
// ---------------------------------------------------------------------------

/// Market cluster a stream connects to. One socket per cluster.
///
/// Never open two streams to the same cluster with one key: the gateway drops
/// the older connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamCluster {
    Stocks,
    Options,
    Forex,
    Crypto,
}

impl StreamCluster {
    /// Path segment of the cluster endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stocks => "stocks",
            Self::Options => "options",
            Self::Forex => "forex",
            Self::Crypto => "crypto",
        }
    }
}

impl fmt::Display for StreamCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stream Host
// ---------------------------------------------------------------------------

/// Which feed to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamHost {
    /// Real-time feed (`socket.polygon.io`).
    #[default]
    RealTime,
    /// 15-minute delayed feed (`delayed.polygon.io`).
    Delayed,
}

impl StreamHost {
    /// Host name of the feed.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RealTime => REAL_TIME_HOST,
            Self::Delayed => DELAYED_HOST,
        }
    }

    /// Full WebSocket URL for a cluster on this host.
    pub fn url(self, cluster: StreamCluster) -> String {
        format!("wss://{}/{}", self.as_str(), cluster.as_str())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Action field of an outbound control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Auth,
    Subscribe,
    Unsubscribe,
}

// ---------------------------------------------------------------------------
// Stream Topic
// ---------------------------------------------------------------------------

/// A logical stream (market + data kind).
///
/// Each topic knows its wire prefix (`T.`), the event code its messages carry
/// (`T`), the cluster it lives on, and whether its symbols need a ticker
/// prefix (`O:` for options).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTopic {
    StockTrades,
    StockQuotes,
    StockMinuteAggregates,
    StockSecondAggregates,
    StockLimitUpLimitDown,
    StockImbalances,
    OptionTrades,
    OptionQuotes,
    OptionMinuteAggregates,
    OptionSecondAggregates,
    ForexQuotes,
    ForexMinuteAggregates,
    CryptoTrades,
    CryptoQuotes,
    CryptoMinuteAggregates,
    CryptoLevel2Book,
}

impl StreamTopic {
    /// Every topic, in declaration order.
    pub const ALL: [StreamTopic; 16] = [
        Self::StockTrades,
        Self::StockQuotes,
        Self::StockMinuteAggregates,
        Self::StockSecondAggregates,
        Self::StockLimitUpLimitDown,
        Self::StockImbalances,
        Self::OptionTrades,
        Self::OptionQuotes,
        Self::OptionMinuteAggregates,
        Self::OptionSecondAggregates,
        Self::ForexQuotes,
        Self::ForexMinuteAggregates,
        Self::CryptoTrades,
        Self::CryptoQuotes,
        Self::CryptoMinuteAggregates,
        Self::CryptoLevel2Book,
    ];

    /// Event code (`ev`) carried by messages of this topic.
    pub fn event_code(self) -> &'static str {
        match self {
            Self::StockTrades | Self::OptionTrades => "T",
            Self::StockQuotes | Self::OptionQuotes => "Q",
            Self::StockMinuteAggregates | Self::OptionMinuteAggregates => "AM",
            Self::StockSecondAggregates | Self::OptionSecondAggregates => "A",
            Self::StockLimitUpLimitDown => "LULD",
            Self::StockImbalances => "NOI",
            Self::ForexQuotes => "C",
            Self::ForexMinuteAggregates => "CA",
            Self::CryptoTrades => "XT",
            Self::CryptoQuotes => "XQ",
            Self::CryptoMinuteAggregates => "XA",
            Self::CryptoLevel2Book => "XL2",
        }
    }

    /// Wire prefix used in subscription params (`T.`).
    pub fn prefix(self) -> String {
        format!("{}.", self.event_code())
    }

    /// Cluster serving this topic.
    pub fn cluster(self) -> StreamCluster {
        match self {
            Self::StockTrades
            | Self::StockQuotes
            | Self::StockMinuteAggregates
            | Self::StockSecondAggregates
            | Self::StockLimitUpLimitDown
            | Self::StockImbalances => StreamCluster::Stocks,
            Self::OptionTrades
            | Self::OptionQuotes
            | Self::OptionMinuteAggregates
            | Self::OptionSecondAggregates => StreamCluster::Options,
            Self::ForexQuotes | Self::ForexMinuteAggregates => StreamCluster::Forex,
            Self::CryptoTrades
            | Self::CryptoQuotes
            | Self::CryptoMinuteAggregates
            | Self::CryptoLevel2Book => StreamCluster::Crypto,
        }
    }

    /// Ticker prefix each symbol of this topic must carry, if any.
    pub fn symbol_prefix(self) -> Option<&'static str> {
        match self.cluster() {
            StreamCluster::Options => Some(OPTION_SYMBOL_PREFIX),
            _ => None,
        }
    }
}

impl fmt::Display for StreamTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.event_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_match_event_codes() {
        assert_eq!(StreamTopic::StockTrades.prefix(), "T.");
        assert_eq!(StreamTopic::OptionTrades.prefix(), "T.");
        assert_eq!(StreamTopic::CryptoLevel2Book.prefix(), "XL2.");
        assert_eq!(StreamTopic::ForexMinuteAggregates.event_code(), "CA");
    }

    #[test]
    fn only_option_topics_prefix_symbols() {
        for topic in StreamTopic::ALL {
            let expected = topic.cluster() == StreamCluster::Options;
            assert_eq!(topic.symbol_prefix().is_some(), expected, "{topic}");
        }
    }

    #[test]
    fn host_url() {
        assert_eq!(
            StreamHost::RealTime.url(StreamCluster::Stocks),
            "wss://socket.polygon.io/stocks"
        );
        assert_eq!(
            StreamHost::Delayed.url(StreamCluster::Crypto),
            "wss://delayed.polygon.io/crypto"
        );
    }

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Action::Unsubscribe).unwrap(),
            "\"unsubscribe\""
        );
    }
}
