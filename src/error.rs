//! Error types for the `polygon-stream` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, PolygonError>`.
//!
//! [`PolygonError`] covers:
//! - **Connect errors** — DNS, TLS or WebSocket handshake failures (retryable)
//! - **Auth rejection** — the gateway answered `auth_failed` (fatal)
//! - **Send / receive errors** — the transport dropped (retryable)
//! - **Reconnect limit** — the retry ceiling was exceeded (fatal)
//! - **JSON / URL errors** — serialization and endpoint construction
//! - **Invalid arguments** — client-side validation errors
//!
//! Decode failures and handler errors never leave the dispatch loop; they are
//! logged and the loop moves on to the next frame or message.

use tokio_tungstenite::tungstenite;

use crate::ws::connection::ConnectionState;

/// Error raised by a message handler.
///
/// Handlers may return any error type; it is logged and dropped.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Ways a single `receive()` on a connection can fail.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    /// The server closed the socket with a normal (1000) close frame.
    #[error("connection closed by server ({code}): {reason}")]
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent by the server.
        reason: String,
    },

    /// The socket closed with a non-normal code, or without a close frame.
    #[error("connection closed abnormally ({code:?}): {reason}")]
    Abnormal {
        /// WebSocket close code, if a close frame was received.
        code: Option<u16>,
        /// Close reason or a description of what happened.
        reason: String,
    },

    /// A transport-level failure while reading.
    #[error("transport error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),

    /// No pong arrived within the configured timeout after a ping.
    #[error("no pong received within {timeout_ms} ms")]
    PongTimeout {
        /// The pong timeout that elapsed.
        timeout_ms: u64,
    },

    /// A frame was not a JSON array of event objects.
    ///
    /// Usually caused by an invalid symbol: the gateway answers with a plain
    /// error string instead of the expected array.
    #[error("unable to decode frame {raw:?}: {source}")]
    Decode {
        /// The raw frame, kept for diagnostics.
        raw: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// `receive()` was called with no open transport.
    #[error("no open transport to receive from")]
    NotConnected,
}

impl ReceiveError {
    /// Whether this error only affects one frame and the connection is
    /// still usable.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

/// All possible errors produced by the `polygon-stream` client.
#[derive(Debug, thiserror::Error)]
pub enum PolygonError {
    /// Opening the WebSocket failed (DNS, TLS, handshake).
    #[error("connect failed: {0}")]
    Connect(#[source] Box<tungstenite::Error>),

    /// The handshake did not finish within the connect timeout.
    #[error("connect timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// The configured connect timeout.
        timeout_ms: u64,
    },

    /// The gateway rejected the API key. Never retried.
    #[error("authentication rejected: {message}")]
    AuthRejected {
        /// The status message sent by the gateway.
        message: String,
    },

    /// A frame was sent while the connection could not accept it.
    #[error("connection is not open (state: {state:?})")]
    NotConnected {
        /// The connection state at the time of the send.
        state: ConnectionState,
    },

    /// Writing a frame to the socket failed.
    #[error("send failed: {0}")]
    Send(#[source] Box<tungstenite::Error>),

    /// Reading from the socket failed.
    #[error(transparent)]
    Receive(#[from] ReceiveError),

    /// The reconnect ceiling was exceeded.
    #[error("gave up after {attempts} reconnect attempts; last error: {last_error}")]
    ReconnectLimit {
        /// Number of reconnect attempts made.
        attempts: u32,
        /// Description of the failure that ended the last attempt.
        last_error: String,
    },

    /// The stream failed and reconnection is disabled.
    #[error("stream failed and reconnection is disabled: {reason}")]
    StreamFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The client was closed.
    #[error("stream client is closed")]
    Closed,

    /// `start()` was called on a client that is already running.
    #[error("stream client already started")]
    AlreadyStarted,

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error building or parsing the stream URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The blocking client could not start its runtime.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl PolygonError {
    /// Whether the supervisor may recover from this error by reconnecting.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_)
            | Self::ConnectTimeout { .. }
            | Self::Send(_)
            | Self::NotConnected { .. } => true,
            Self::Receive(e) => !matches!(e, ReceiveError::Decode { .. }),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PolygonError>;
