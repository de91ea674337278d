//! The public streaming client.
//!
//! # Example
//!
//! ```no_run
//! use polygon_stream::{StreamClientBuilder, StreamCluster, handler_fn};
//!
//! # #[tokio::main]
//! # async fn main() -> polygon_stream::Result<()> {
//! let client = StreamClientBuilder::new("api-key", StreamCluster::Stocks).build()?;
//!
//! client.register_handler("T", handler_fn(|msg| {
//!     println!("trade {:?} @ {:?}", msg.symbol(), msg.get("p"));
//!     Ok(())
//! }));
//! client.subscribe_stock_trades(["AMD", "NVDA"]).await?;
//!
//! client.start().await?;
//! client.wait().await
//! # }
//! ```

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::{PolygonError, Result};
use crate::types::{Action, StreamCluster, StreamTopic};
use crate::ws::codec::{Symbols, control_frame, encode, normalize};
use crate::ws::config::StreamConfig;
use crate::ws::connection::{Connection, ConnectionState, Connector};
use crate::ws::handlers::Handler;
use crate::ws::socket::WsConnector;
use crate::ws::supervisor::{Shared, Supervisor, SupervisorState, Termination};

/// Point-in-time view of a client, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHealth {
    pub cluster: StreamCluster,
    pub state: SupervisorState,
    pub connection: ConnectionState,
    /// Attempts since the last `auth_success`.
    pub reconnect_attempts: u32,
    /// Reconnects over the client's lifetime.
    pub total_reconnects: u64,
    /// Entries in the subscription ledger.
    pub subscriptions: usize,
    /// Handler tasks currently running (spawn mode).
    pub in_flight_handlers: usize,
}

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Finished,
}

/// Streaming client for one cluster.
///
/// All methods take `&self`; wrap the client in an `Arc` to share it between
/// tasks. Subscriptions and handlers may be set up before [`start`] and
/// changed at any time while streaming.
///
/// [`start`]: Self::start
pub struct StreamClient<C: Connector = WsConnector> {
    shared: Arc<Shared<C>>,
    connector: Arc<C>,
    api_key: String,
    lifecycle: Mutex<Lifecycle>,
}

impl<C: Connector> fmt::Debug for StreamClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("cluster", &self.shared.cluster())
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state())
            .field("connection", &self.connection_state())
            .finish()
    }
}

impl<C: Connector> StreamClient<C> {
    /// Prefer [`StreamClientBuilder`](crate::ws::config::StreamClientBuilder).
    pub fn new(api_key: impl Into<String>, config: StreamConfig, connector: C) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            connector: Arc::new(connector),
            api_key: api_key.into(),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Launch the supervisor task. Returns immediately; connection failures
    /// are handled by the reconnect policy and surface through
    /// [`wait`](Self::wait).
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match *lifecycle {
            Lifecycle::Running(_) => return Err(PolygonError::AlreadyStarted),
            Lifecycle::Finished => return Err(PolygonError::Closed),
            Lifecycle::Idle => {}
        }

        let connection = Connection::with_outbound(
            Arc::clone(&self.connector),
            self.api_key.clone(),
            self.shared.outbound.clone(),
        )
        .with_connect_timeout(self.shared.config.connect_timeout);
        let supervisor = Supervisor::new(Arc::clone(&self.shared), connection);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            if AssertUnwindSafe(supervisor.run()).catch_unwind().await.is_err() {
                tracing::error!(cluster = %shared.cluster(), "Stream supervisor panicked");
                shared.finish(Termination::Failed {
                    reason: "stream supervisor panicked".into(),
                });
            }
        });
        *lifecycle = Lifecycle::Running(handle);

        tracing::info!(
            cluster = %self.shared.cluster(),
            endpoint = %self.connector.endpoint(),
            "Stream client started"
        );
        Ok(())
    }

    /// Wait for the supervisor to finish.
    ///
    /// `Ok(())` after [`close`](Self::close); otherwise the error that ended
    /// the stream (`AuthRejected`, `ReconnectLimit`, `StreamFailed`).
    pub async fn wait(&self) -> Result<()> {
        if matches!(*self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner), Lifecycle::Idle) {
            return Err(PolygonError::InvalidArgument(
                "stream client not started; call start() first".into(),
            ));
        }
        self.termination().await.into_result()
    }

    /// Stop streaming: close the socket, give handler tasks the shutdown
    /// grace period, and stop the supervisor. Safe to call repeatedly and
    /// before `start()`.
    ///
    /// Do not await this from inside an inline handler; the supervisor is
    /// the one running that handler.
    pub async fn close(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            match *lifecycle {
                Lifecycle::Idle => {
                    *lifecycle = Lifecycle::Finished;
                    self.shared.outbound.set_state(ConnectionState::Closed);
                    self.shared.finish(Termination::Closed);
                    return Ok(());
                }
                Lifecycle::Finished => return Ok(()),
                Lifecycle::Running(_) => {}
            }
        }
        tracing::debug!(cluster = %self.shared.cluster(), "Close requested");
        self.shared.shutdown.send_replace(true);
        self.termination().await;
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = Lifecycle::Finished;
        Ok(())
    }

    /// Drop the current connection and reconnect now, resetting the attempt
    /// counter. Starts the client if it was never started.
    ///
    /// While a connection is being established the request is absorbed by
    /// it; while waiting out the reconnect delay it cuts the delay short.
    pub async fn reconnect(&self) -> Result<()> {
        let idle = matches!(
            *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner),
            Lifecycle::Idle
        );
        if idle {
            return self.start().await;
        }
        self.ensure_open()?;
        self.shared.reconnect_requested.notify_one();
        Ok(())
    }

    async fn termination(&self) -> Termination {
        let mut rx = self.shared.termination.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or(Termination::Closed),
            Err(_) => Termination::Closed,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_terminated() {
            Err(PolygonError::Closed)
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Subscribe to `topic` for `symbols`.
    ///
    /// The subscription is recorded and replayed after every reconnect. If
    /// the connection is down it is only recorded; if the write fails it is
    /// logged and the replay covers it.
    pub async fn subscribe(&self, topic: StreamTopic, symbols: impl Into<Symbols>) -> Result<()> {
        self.apply(topic, symbols.into(), Action::Subscribe).await
    }

    /// Route `topic`'s event code to `handler`, then subscribe.
    pub async fn subscribe_with(
        &self,
        topic: StreamTopic,
        symbols: impl Into<Symbols>,
        handler: impl Handler,
    ) -> Result<()> {
        self.ensure_open()?;
        self.check_cluster(topic)?;
        self.shared.handlers.register(topic.event_code(), handler);
        self.subscribe(topic, symbols).await
    }

    /// Unsubscribe from `topic` for `symbols`.
    pub async fn unsubscribe(&self, topic: StreamTopic, symbols: impl Into<Symbols>) -> Result<()> {
        self.apply(topic, symbols.into(), Action::Unsubscribe).await
    }

    /// `(params, action)` frames that would be replayed on reconnect.
    pub async fn subscriptions(&self) -> Vec<(String, Action)> {
        self.shared.ledger.lock().await.snapshot()
    }

    async fn apply(&self, topic: StreamTopic, symbols: Symbols, action: Action) -> Result<()> {
        self.ensure_open()?;
        self.check_cluster(topic)?;
        let symbols = normalize(topic, symbols)?;
        let prefix = topic.prefix();
        let params = encode(&prefix, &symbols)?;
        let frame = control_frame(action, &params)?;

        let mut ledger = self.shared.ledger.lock().await;
        ledger.record(&prefix, &symbols, action);

        let state = self.shared.outbound.state();
        if !state.accepts_subscriptions(self.shared.config.replay_gate) {
            tracing::debug!(params = %params, ?action, ?state, "Recorded for replay");
            return Ok(());
        }
        match self.shared.outbound.send(frame).await {
            Ok(()) => tracing::debug!(params = %params, ?action, "Sent"),
            Err(e) => tracing::warn!(
                params = %params,
                ?action,
                error = %e,
                "Send failed; will replay after reconnect"
            ),
        }
        Ok(())
    }

    fn check_cluster(&self, topic: StreamTopic) -> Result<()> {
        let cluster = self.shared.cluster();
        if topic.cluster() != cluster {
            return Err(PolygonError::InvalidArgument(format!(
                "{topic} belongs to the {} cluster, but this client streams {cluster}",
                topic.cluster()
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    /// Route messages with event code `ev` to `handler`.
    pub fn register_handler(&self, ev: impl Into<String>, handler: impl Handler) {
        self.shared.handlers.register(ev, handler);
    }

    /// Route `topic`'s event code to `handler`, replacing the current one.
    ///
    /// Note that stock and option topics of the same kind share an event
    /// code.
    pub fn register_topic_handler(&self, topic: StreamTopic, handler: impl Handler) {
        self.shared.handlers.register(topic.event_code(), handler);
    }

    /// Remove the handler for `ev`. Returns whether one existed.
    pub fn remove_handler(&self, ev: &str) -> bool {
        self.shared.handlers.remove(ev)
    }

    /// Replace the fallback for unrouted event codes.
    pub fn set_default_handler(&self, handler: impl Handler) {
        self.shared.handlers.set_default(handler);
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn cluster(&self) -> StreamCluster {
        self.shared.cluster()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Supervisor state.
    pub fn state(&self) -> SupervisorState {
        *self.shared.phase.borrow()
    }

    /// State of the current connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.outbound.state()
    }

    /// Notified on every supervisor state change.
    pub fn state_changes(&self) -> watch::Receiver<SupervisorState> {
        self.shared.phase.subscribe()
    }

    /// Notified on every connection state change.
    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.outbound.watch()
    }

    /// Attempts since the last `auth_success`.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub async fn health(&self) -> StreamHealth {
        let subscriptions = self.shared.ledger.lock().await.len();
        let max = self.shared.config.max_in_flight_handlers;
        StreamHealth {
            cluster: self.shared.cluster(),
            state: self.state(),
            connection: self.connection_state(),
            reconnect_attempts: self.reconnect_attempts(),
            total_reconnects: self.shared.total_reconnects.load(Ordering::SeqCst),
            subscriptions,
            in_flight_handlers: max.saturating_sub(self.shared.handler_slots.available_permits()),
        }
    }

    /// Receiver for raw inbound frames, if enabled in the config.
    pub fn raw_frames(&self) -> Option<broadcast::Receiver<Bytes>> {
        self.shared.raw_tx.as_ref().map(broadcast::Sender::subscribe)
    }
}

impl<C: Connector> Drop for StreamClient<C> {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Running(task) = lifecycle {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Per-topic shorthands
// ---------------------------------------------------------------------------

macro_rules! topic_methods {
    ($($topic:ident => $subscribe:ident, $unsubscribe:ident, $what:literal;)*) => {
        impl<C: Connector> StreamClient<C> {
            $(
                #[doc = concat!("Subscribe to ", $what, ".")]
                pub async fn $subscribe(&self, symbols: impl Into<Symbols>) -> Result<()> {
                    self.subscribe(StreamTopic::$topic, symbols).await
                }

                #[doc = concat!("Unsubscribe from ", $what, ".")]
                pub async fn $unsubscribe(&self, symbols: impl Into<Symbols>) -> Result<()> {
                    self.unsubscribe(StreamTopic::$topic, symbols).await
                }
            )*
        }
    };
}

topic_methods! {
    StockTrades => subscribe_stock_trades, unsubscribe_stock_trades, "stock trades (`T`)";
    StockQuotes => subscribe_stock_quotes, unsubscribe_stock_quotes, "stock NBBO quotes (`Q`)";
    StockMinuteAggregates => subscribe_stock_minute_aggregates, unsubscribe_stock_minute_aggregates, "stock minute bars (`AM`)";
    StockSecondAggregates => subscribe_stock_second_aggregates, unsubscribe_stock_second_aggregates, "stock second bars (`A`)";
    StockLimitUpLimitDown => subscribe_stock_limit_up_limit_down, unsubscribe_stock_limit_up_limit_down, "limit-up / limit-down bands (`LULD`)";
    StockImbalances => subscribe_stock_imbalances, unsubscribe_stock_imbalances, "net order imbalances (`NOI`)";
    OptionTrades => subscribe_option_trades, unsubscribe_option_trades, "option trades (`T`)";
    OptionQuotes => subscribe_option_quotes, unsubscribe_option_quotes, "option quotes (`Q`)";
    OptionMinuteAggregates => subscribe_option_minute_aggregates, unsubscribe_option_minute_aggregates, "option minute bars (`AM`)";
    OptionSecondAggregates => subscribe_option_second_aggregates, unsubscribe_option_second_aggregates, "option second bars (`A`)";
    ForexQuotes => subscribe_forex_quotes, unsubscribe_forex_quotes, "forex quotes (`C`)";
    ForexMinuteAggregates => subscribe_forex_minute_aggregates, unsubscribe_forex_minute_aggregates, "forex minute bars (`CA`)";
    CryptoTrades => subscribe_crypto_trades, unsubscribe_crypto_trades, "crypto trades (`XT`)";
    CryptoQuotes => subscribe_crypto_quotes, unsubscribe_crypto_quotes, "crypto quotes (`XQ`)";
    CryptoMinuteAggregates => subscribe_crypto_minute_aggregates, unsubscribe_crypto_minute_aggregates, "crypto minute bars (`XA`)";
    CryptoLevel2Book => subscribe_crypto_level2_book, unsubscribe_crypto_level2_book, "crypto level-2 books (`XL2`)";
}
