//! # polygon-stream
//!
//! A Rust client for the [Polygon.io](https://polygon.io/docs/stocks/ws_getting-started)
//! real-time WebSocket feed.
//!
//! The client authenticates, keeps a dynamic subscription set, routes each
//! event to a handler by its event code, and reconnects on its own, replaying
//! the subscriptions on every new socket.
//!
//! ## Quick Start
//!
//! ```no_run
//! use polygon_stream::{StreamClientBuilder, StreamCluster, StreamTopic, handler_fn};
//! use polygon_stream::types::events::TradeEvent;
//!
//! #[tokio::main]
//! async fn main() -> polygon_stream::Result<()> {
//!     let client = StreamClientBuilder::new("your-api-key", StreamCluster::Stocks).build()?;
//!
//!     client
//!         .subscribe_with(StreamTopic::StockTrades, ["AMD", "NVDA"], handler_fn(|msg| {
//!             let trade: TradeEvent = msg.decode()?;
//!             println!("{} {:?} x {:?}", trade.symbol, trade.price, trade.size);
//!             Ok(())
//!         }))
//!         .await?;
//!
//!     client.start().await?;
//!     client.wait().await
//! }
//! ```

pub mod constants;
pub mod error;
pub mod types;
pub mod ws;

/// Re-export the client types at crate root for convenience.
pub use ws::client::{StreamClient, StreamHealth};
pub use ws::codec::Symbols;
pub use ws::config::{StreamClientBuilder, StreamConfig};
pub use ws::handlers::handler_fn;
/// Re-export the error type and Result alias.
pub use error::{PolygonError, Result};
pub use types::{Message, StreamCluster, StreamTopic};
