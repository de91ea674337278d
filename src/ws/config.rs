//! Stream configuration and the [`StreamClientBuilder`].

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use url::Url;

use crate::constants::defaults;
use crate::error::{PolygonError, Result};
use crate::types::{StreamCluster, StreamHost};
use crate::ws::client::StreamClient;
use crate::ws::connection::Connector;
use crate::ws::socket::WsConnector;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// How handlers are scheduled relative to the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Every handler call runs as its own task. At most
    /// `max_in_flight_handlers` run at once; beyond that the receive loop
    /// waits up to `handler_budget` for a free slot and then drops the
    /// message with a warning.
    #[default]
    Spawn,
    /// Handlers run one at a time inside the receive loop, in arrival order.
    /// A handler that exceeds `handler_budget` is abandoned.
    Inline,
}

/// When the subscription ledger is replayed on a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayGate {
    /// Right after the auth frame is written.
    #[default]
    OnConnect,
    /// Only after the gateway confirms `auth_success`. Caller subscriptions
    /// made while authenticating are held back until then as well.
    OnAuthSuccess,
}

/// Reconnection behaviour after a dropped connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Attempts allowed since the last `auth_success`. `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Fixed delay before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(defaults::MAX_RECONNECT_ATTEMPTS),
            delay: defaults::RECONNECT_DELAY,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`StreamClient`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Cluster to connect to.
    pub cluster: StreamCluster,
    /// Real-time or delayed feed.
    pub host: StreamHost,
    /// Full endpoint URL, overriding `host` and `cluster` when set.
    pub url: Option<String>,
    /// Time allowed for the TCP, TLS and WebSocket handshake. A timeout is
    /// a retryable connect failure.
    pub connect_timeout: Duration,
    /// Interval between client pings. `None` disables keepalive.
    pub ping_interval: Option<Duration>,
    /// Time allowed for a pong before the socket is treated as dead.
    pub pong_timeout: Duration,
    /// Largest inbound message accepted. `None` is unlimited.
    pub max_message_size: Option<usize>,
    /// Largest inbound frame accepted. `None` is unlimited.
    pub max_frame_size: Option<usize>,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Cap on concurrently running handler tasks (spawn mode).
    pub max_in_flight_handlers: usize,
    /// See [`DispatchMode`].
    pub handler_budget: Duration,
    pub dispatch_mode: DispatchMode,
    pub reconnect: ReconnectPolicy,
    /// How long `close()` waits for in-flight handler tasks.
    pub shutdown_grace: Duration,
    pub replay_gate: ReplayGate,
    /// Whether raw inbound frames are also broadcast.
    pub enable_raw_frames: bool,
    /// Broadcast channel capacity for raw frames.
    pub raw_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(StreamCluster::Stocks)
    }
}

impl StreamConfig {
    /// Defaults for `cluster`.
    pub fn new(cluster: StreamCluster) -> Self {
        Self {
            cluster,
            host: StreamHost::default(),
            url: None,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            ping_interval: Some(defaults::PING_INTERVAL),
            pong_timeout: defaults::PONG_TIMEOUT,
            max_message_size: Some(defaults::MAX_MESSAGE_SIZE),
            max_frame_size: Some(defaults::MAX_FRAME_SIZE),
            read_buffer_size: defaults::READ_BUFFER_SIZE,
            write_buffer_size: defaults::WRITE_BUFFER_SIZE,
            max_in_flight_handlers: defaults::MAX_IN_FLIGHT_HANDLERS,
            handler_budget: defaults::HANDLER_BUDGET,
            dispatch_mode: DispatchMode::default(),
            reconnect: ReconnectPolicy::default(),
            shutdown_grace: defaults::SHUTDOWN_GRACE,
            replay_gate: ReplayGate::default(),
            enable_raw_frames: false,
            raw_channel_capacity: defaults::RAW_CHANNEL_CAPACITY,
        }
    }

    /// The endpoint this configuration connects to.
    pub fn endpoint(&self) -> Result<Url> {
        let raw = match &self.url {
            Some(url) => url.clone(),
            None => self.host.url(self.cluster),
        };
        let url = Url::parse(&raw)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(PolygonError::InvalidArgument(format!(
                "stream URL must use ws:// or wss://, got {other}://"
            ))),
        }
    }

    /// Frame-size and buffer settings for the WebSocket layer.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .read_buffer_size(self.read_buffer_size)
            .write_buffer_size(self.write_buffer_size)
            .max_message_size(self.max_message_size)
            .max_frame_size(self.max_frame_size)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect.max_attempts == Some(0) {
            return Err(PolygonError::InvalidArgument(
                "max_reconnect_attempts must be at least 1; use auto_reconnect(false) to disable"
                    .into(),
            ));
        }
        if self.max_in_flight_handlers == 0 {
            return Err(PolygonError::InvalidArgument(
                "max_in_flight_handlers must be at least 1".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(PolygonError::InvalidArgument(
                "connect_timeout must be non-zero".into(),
            ));
        }
        if self.ping_interval.is_some_and(|d| d.is_zero()) {
            return Err(PolygonError::InvalidArgument(
                "ping_interval must be non-zero; use disable_ping() to turn keepalive off".into(),
            ));
        }
        if self.enable_raw_frames && self.raw_channel_capacity == 0 {
            return Err(PolygonError::InvalidArgument(
                "raw_channel_capacity must be at least 1".into(),
            ));
        }
        if self.reconnect.enabled && self.reconnect.max_attempts.is_none() {
            tracing::warn!(
                cluster = %self.cluster,
                "Reconnect attempts are unbounded; the client will retry forever"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`StreamClient`].
///
/// ```no_run
/// use std::time::Duration;
/// use polygon_stream::ws::config::{DispatchMode, StreamClientBuilder};
/// use polygon_stream::types::StreamCluster;
///
/// # fn main() -> polygon_stream::Result<()> {
/// let client = StreamClientBuilder::new("api-key", StreamCluster::Stocks)
///     .dispatch_mode(DispatchMode::Inline)
///     .max_reconnect_attempts(10)
///     .reconnect_delay(Duration::from_secs(2))
///     .build()?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StreamClientBuilder {
    api_key: String,
    config: StreamConfig,
}

impl StreamClientBuilder {
    /// Start from the defaults for `cluster`.
    pub fn new(api_key: impl Into<String>, cluster: StreamCluster) -> Self {
        Self {
            api_key: api_key.into(),
            config: StreamConfig::new(cluster),
        }
    }

    /// Replace the whole configuration. The cluster of `config` wins.
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Real-time or delayed feed. Default: real-time.
    pub fn host(mut self, host: StreamHost) -> Self {
        self.config.host = host;
        self
    }

    /// Connect to an explicit URL instead of `wss://<host>/<cluster>`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    /// Bound on the TCP, TLS and WebSocket handshake. Default: 10 s.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Ping interval. Default: 20 s.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = Some(interval);
        self
    }

    /// Turn client keepalive pings off.
    pub fn disable_ping(mut self) -> Self {
        self.config.ping_interval = None;
        self
    }

    /// Pong timeout. Default: 19 s.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.config.pong_timeout = timeout;
        self
    }

    /// Maximum inbound message size. Default: 1 MiB.
    pub fn max_message_size(mut self, size: Option<usize>) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Maximum inbound frame size. Default: 1 MiB.
    pub fn max_frame_size(mut self, size: Option<usize>) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Cap on concurrent handler tasks. Default: 32.
    pub fn max_in_flight_handlers(mut self, n: usize) -> Self {
        self.config.max_in_flight_handlers = n;
        self
    }

    /// Per-message handler budget. Default: 5 s.
    pub fn handler_budget(mut self, budget: Duration) -> Self {
        self.config.handler_budget = budget;
        self
    }

    /// Handler scheduling. Default: [`DispatchMode::Spawn`].
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    /// Enable or disable reconnection. Default: enabled.
    pub fn auto_reconnect(mut self, enable: bool) -> Self {
        self.config.reconnect.enabled = enable;
        self
    }

    /// Attempts allowed between two `auth_success`. Default: 5.
    pub fn max_reconnect_attempts(mut self, n: u32) -> Self {
        self.config.reconnect.max_attempts = Some(n);
        self
    }

    /// Retry forever. Logged as a warning at build time.
    pub fn unbounded_reconnects(mut self) -> Self {
        self.config.reconnect.max_attempts = None;
        self
    }

    /// Delay before each reconnect attempt. Default: 5 s.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.delay = delay;
        self
    }

    /// Grace period for handler tasks on `close()`. Default: 2 s.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// When to replay subscriptions. Default: [`ReplayGate::OnConnect`].
    pub fn replay_gate(mut self, gate: ReplayGate) -> Self {
        self.config.replay_gate = gate;
        self
    }

    /// Also broadcast every raw inbound frame. Default: false.
    pub fn enable_raw_frames(mut self, enable: bool) -> Self {
        self.config.enable_raw_frames = enable;
        self
    }

    /// Raw-frame channel capacity. Default: 4,096.
    pub fn raw_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.raw_channel_capacity = capacity;
        self
    }

    /// The configuration built so far.
    pub fn current_config(&self) -> &StreamConfig {
        &self.config
    }

    /// Build a client over tokio-tungstenite.
    pub fn build(self) -> Result<StreamClient<WsConnector>> {
        let connector = WsConnector::new(self.config.endpoint()?, self.config.websocket_config());
        self.build_with_connector(connector)
    }

    /// Build a client over a custom transport.
    pub fn build_with_connector<C: Connector>(self, connector: C) -> Result<StreamClient<C>> {
        if self.api_key.trim().is_empty() {
            return Err(PolygonError::InvalidArgument("API key is empty".into()));
        }
        self.config.validate()?;
        Ok(StreamClient::new(self.api_key, self.config, connector))
    }

    /// Build a [`BlockingStreamClient`](crate::ws::blocking::BlockingStreamClient)
    /// over tokio-tungstenite. Dispatch is forced to [`DispatchMode::Inline`].
    pub fn build_blocking(self) -> Result<crate::ws::blocking::BlockingStreamClient<WsConnector>> {
        let connector = WsConnector::new(self.config.endpoint()?, self.config.websocket_config());
        self.build_blocking_with_connector(connector)
    }

    /// Blocking client over a custom transport.
    pub fn build_blocking_with_connector<C: Connector>(
        self,
        connector: C,
    ) -> Result<crate::ws::blocking::BlockingStreamClient<C>> {
        let client = self
            .dispatch_mode(DispatchMode::Inline)
            .build_with_connector(connector)?;
        crate::ws::blocking::BlockingStreamClient::new(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_from_host_and_cluster() {
        let config = StreamConfig::new(StreamCluster::Options);
        assert_eq!(config.endpoint().unwrap().as_str(), "wss://socket.polygon.io/options");

        let mut delayed = StreamConfig::new(StreamCluster::Stocks);
        delayed.host = StreamHost::Delayed;
        assert_eq!(delayed.endpoint().unwrap().as_str(), "wss://delayed.polygon.io/stocks");
    }

    #[test]
    fn endpoint_override_must_be_websocket() {
        let mut config = StreamConfig::default();
        config.url = Some("ws://127.0.0.1:9000/stocks".into());
        assert_eq!(config.endpoint().unwrap().port(), Some(9000));

        config.url = Some("https://socket.polygon.io/stocks".into());
        assert!(matches!(config.endpoint(), Err(PolygonError::InvalidArgument(_))));

        config.url = Some("not a url".into());
        assert!(matches!(config.endpoint(), Err(PolygonError::Url(_))));
    }

    #[test]
    fn validation() {
        assert!(StreamConfig::default().validate().is_ok());

        let mut zero = StreamConfig::default();
        zero.reconnect.max_attempts = Some(0);
        assert!(zero.validate().is_err());

        let mut no_slots = StreamConfig::default();
        no_slots.max_in_flight_handlers = 0;
        assert!(no_slots.validate().is_err());

        let mut no_connect_time = StreamConfig::default();
        no_connect_time.connect_timeout = Duration::ZERO;
        assert!(no_connect_time.validate().is_err());

        let mut unbounded = StreamConfig::default();
        unbounded.reconnect.max_attempts = None;
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn builder_sets_knobs() {
        let builder = StreamClientBuilder::new("key", StreamCluster::Crypto)
            .disable_ping()
            .dispatch_mode(DispatchMode::Inline)
            .replay_gate(ReplayGate::OnAuthSuccess)
            .max_reconnect_attempts(3)
            .reconnect_delay(Duration::from_millis(250));
        let config = builder.current_config();
        assert_eq!(config.cluster, StreamCluster::Crypto);
        assert_eq!(config.ping_interval, None);
        assert_eq!(config.dispatch_mode, DispatchMode::Inline);
        assert_eq!(config.replay_gate, ReplayGate::OnAuthSuccess);
        assert_eq!(config.reconnect.max_attempts, Some(3));
        assert_eq!(config.reconnect.delay, Duration::from_millis(250));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            StreamClientBuilder::new("  ", StreamCluster::Stocks).build(),
            Err(PolygonError::InvalidArgument(_))
        ));
    }
}
