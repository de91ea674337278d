//! Constants for the Polygon.io streaming gateway.
//!
//! Contains the WebSocket hosts and the default values used by
//! [`StreamConfig`](crate::ws::config::StreamConfig). They are exported for
//! advanced usage.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

/// Host of the real-time feed.
pub const REAL_TIME_HOST: &str = "socket.polygon.io";

/// Host of the 15-minute delayed feed.
pub const DELAYED_HOST: &str = "delayed.polygon.io";

/// Maximum number of concurrent streams per account (one per cluster).
pub const MAX_CONCURRENT_CLUSTERS: usize = 4;

// ---------------------------------------------------------------------------
// Wire values
// ---------------------------------------------------------------------------

/// Event code of control messages.
pub const STATUS_EVENT: &str = "status";

/// Wildcard symbol meaning "every ticker".
pub const WILDCARD: &str = "*";

/// Symbol prefix of option contracts (`O:TSLA210903C00700000`).
pub const OPTION_SYMBOL_PREFIX: &str = "O:";

/// Symbol prefix of forex pairs (`C:EUR/USD`).
pub const FOREX_SYMBOL_PREFIX: &str = "C:";

/// Symbol prefix of crypto pairs (`X:BTC-USD`).
pub const CRYPTO_SYMBOL_PREFIX: &str = "X:";

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Connection tuning defaults.
pub mod defaults {
    use super::Duration;

    /// Time allowed to open the socket (TCP, TLS and WebSocket upgrade).
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Interval between client pings.
    pub const PING_INTERVAL: Duration = Duration::from_secs(20);
    /// How long to wait for a pong before declaring the socket dead.
    pub const PONG_TIMEOUT: Duration = Duration::from_secs(19);
    /// Maximum size of one inbound message (1 MiB).
    pub const MAX_MESSAGE_SIZE: usize = 1 << 20;
    /// Maximum size of one inbound frame (1 MiB).
    pub const MAX_FRAME_SIZE: usize = 1 << 20;
    /// Read buffer size (64 KiB).
    pub const READ_BUFFER_SIZE: usize = 64 * 1024;
    /// Write buffer size (64 KiB).
    pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;
    /// Maximum number of handler tasks in flight before the receive loop
    /// applies back-pressure.
    pub const MAX_IN_FLIGHT_HANDLERS: usize = 32;
    /// Time the receive loop may spend on one handler (inline mode) or
    /// waiting for a free handler slot (spawn mode).
    pub const HANDLER_BUDGET: Duration = Duration::from_secs(5);
    /// Reconnect attempts before giving up.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
    /// Delay before each reconnect attempt.
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
    /// How long `close()` waits for in-flight handler tasks.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
    /// Capacity of the raw-frame broadcast channel.
    pub const RAW_CHANNEL_CAPACITY: usize = 4096;
}
