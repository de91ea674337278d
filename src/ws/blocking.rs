//! Blocking facade for callers without an async runtime.
//!
//! The client owns a one-worker Tokio runtime. The receive loop runs on that
//! worker thread (named `polygon-stream`), handlers run inline on it in
//! arrival order, and every method here blocks the calling thread.
//!
//! ```no_run
//! use polygon_stream::{StreamClientBuilder, StreamCluster, StreamTopic, handler_fn};
//!
//! # fn main() -> polygon_stream::Result<()> {
//! let mut client = StreamClientBuilder::new("api-key", StreamCluster::Crypto).build_blocking()?;
//! client.register_handler("XT", handler_fn(|msg| {
//!     println!("{:?}", msg.symbol());
//!     Ok(())
//! }));
//! client.start()?;
//! client.subscribe(StreamTopic::CryptoTrades, ["BTC-USD"])?;
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! client.close()
//! # }
//! ```

use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;

use crate::error::{PolygonError, Result};
use crate::types::{Action, StreamTopic};
use crate::ws::client::{StreamClient, StreamHealth};
use crate::ws::codec::Symbols;
use crate::ws::connection::{ConnectionState, Connector};
use crate::ws::handlers::Handler;
use crate::ws::socket::WsConnector;

/// How long `subscribe` waits for the connection to become ready.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`StreamClient`] driven from synchronous code.
pub struct BlockingStreamClient<C: Connector = WsConnector> {
    client: StreamClient<C>,
    runtime: Option<Runtime>,
    ready_timeout: Duration,
}

impl<C: Connector> BlockingStreamClient<C> {
    /// Wrap `client` with its own runtime.
    pub fn new(client: StreamClient<C>) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("polygon-stream")
            .enable_all()
            .build()?;
        Ok(Self {
            client,
            runtime: Some(runtime),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        })
    }

    /// How long `subscribe`/`unsubscribe` wait for the ready gate.
    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or(PolygonError::Closed)
    }

    /// The async client underneath, for inspection.
    pub fn inner(&self) -> &StreamClient<C> {
        &self.client
    }

    /// Start the receive loop on the worker thread.
    pub fn start(&self) -> Result<()> {
        self.runtime()?.block_on(self.client.start())
    }

    /// Block until the connection is ready (or the ready timeout passes),
    /// then subscribe.
    ///
    /// A subscription made before the gate opens is still recorded and
    /// replayed once the connection comes up.
    pub fn subscribe(&self, topic: StreamTopic, symbols: impl Into<Symbols>) -> Result<()> {
        let symbols = symbols.into();
        self.runtime()?.block_on(async {
            self.wait_ready().await;
            self.client.subscribe(topic, symbols).await
        })
    }

    pub fn unsubscribe(&self, topic: StreamTopic, symbols: impl Into<Symbols>) -> Result<()> {
        let symbols = symbols.into();
        self.runtime()?.block_on(async {
            self.wait_ready().await;
            self.client.unsubscribe(topic, symbols).await
        })
    }

    pub fn register_handler(&self, ev: impl Into<String>, handler: impl Handler) {
        self.client.register_handler(ev, handler);
    }

    pub fn set_default_handler(&self, handler: impl Handler) {
        self.client.set_default_handler(handler);
    }

    /// See [`StreamClient::subscriptions`].
    pub fn subscriptions(&self) -> Result<Vec<(String, Action)>> {
        Ok(self.runtime()?.block_on(self.client.subscriptions()))
    }

    pub fn health(&self) -> Result<StreamHealth> {
        Ok(self.runtime()?.block_on(self.client.health()))
    }

    /// Block until the stream ends. See [`StreamClient::wait`].
    pub fn wait(&self) -> Result<()> {
        self.runtime()?.block_on(self.client.wait())
    }

    /// Close the stream and join the worker thread. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };
        let result = runtime.block_on(self.client.close());
        runtime.shutdown_timeout(self.client.config().shutdown_grace);
        result
    }

    async fn wait_ready(&self) {
        if self.client.connection_state() == ConnectionState::Ready {
            return;
        }
        let mut changes = self.client.connection_changes();
        let ready = changes.wait_for(|state| *state == ConnectionState::Ready || state.is_terminal());
        if timeout(self.ready_timeout, ready).await.is_err() {
            tracing::debug!(
                timeout_ms = self.ready_timeout.as_millis() as u64,
                "Connection not ready; recording subscription for replay"
            );
        }
    }
}

impl<C: Connector> Drop for BlockingStreamClient<C> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
