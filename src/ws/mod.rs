//! Streaming client for the Polygon.io WebSocket gateway.
//!
//! One [`StreamClient`](client::StreamClient) holds one socket to one market
//! cluster (`wss://socket.polygon.io/{stocks,options,forex,crypto}`).
//!
//! ## Layers
//!
//! - [`codec`] — Symbol sets, `params` encoding and control frames
//! - [`handlers`] — Event-code → handler routing table
//! - [`connection`] — One session: connect, authenticate, send, receive, close
//! - [`socket`] — tokio-tungstenite transport
//! - [`ledger`] — Net subscription set, replayed on reconnect
//! - [`supervisor`] — Receive loop, dispatch, keepalive and reconnection
//! - [`config`] — [`StreamConfig`](config::StreamConfig) and the builder
//! - [`client`] — Async public API
//! - [`blocking`] — Thread-based facade
//!
//! ## Wire protocol
//!
//! Outbound control frames are JSON objects:
//!
//! ```text
//! {"action":"auth","params":"<API_KEY>"}
//! {"action":"subscribe","params":"T.AMD,T.NVDA"}
//! {"action":"unsubscribe","params":"Q.*"}
//! ```
//!
//! Inbound frames are JSON arrays of events, each tagged with `ev`. Control
//! messages use `ev = "status"` (`connected`, `auth_success`, `auth_failed`,
//! `success`, `error`).
//!
//! ## Limits
//!
//! - One socket per cluster per API key; a second one replaces the first
//! - At most four clusters streamed at once per account

pub mod blocking;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod ledger;
pub mod socket;
pub mod supervisor;
