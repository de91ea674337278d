//! One WebSocket session: open, authenticate, send, receive, close.
//!
//! The transport sits behind three small traits so the session logic can run
//! over tokio-tungstenite in production ([`crate::ws::socket`]) and over an
//! in-memory script in tests.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open ok──▶ Authenticating
//!      ▲                          │                        │
//!      └──────open failed─────────┘               auth_success
//!                                                          ▼
//!   Closed ◀──close()── Closing ◀──close()───────────── Ready
//!
//!   Failed: the gateway rejected the API key (terminal)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite;

use crate::constants::defaults;
use crate::error::{PolygonError, ReceiveError, Result};
use crate::ws::codec::auth_frame;
use crate::ws::config::ReplayGate;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Auth frame sent; waiting for `auth_success`.
    Authenticating,
    /// Authenticated.
    Ready,
    /// `close()` in progress.
    Closing,
    /// Closed by the client. Terminal.
    Closed,
    /// API key rejected. Terminal.
    Failed,
}

impl ConnectionState {
    /// Whether frames may be written in this state.
    pub fn accepts_sends(self) -> bool {
        matches!(self, Self::Authenticating | Self::Ready)
    }

    /// Whether caller subscriptions go straight to the wire in this state,
    /// rather than only into the ledger for replay.
    pub fn accepts_subscriptions(self, gate: ReplayGate) -> bool {
        match gate {
            ReplayGate::OnConnect => self.accepts_sends(),
            ReplayGate::OnAuthSuccess => self == Self::Ready,
        }
    }

    /// `Closed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Transport traits
// ---------------------------------------------------------------------------

/// An inbound WebSocket frame, stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping,
    Pong,
    /// Close frame with its code and reason, if it carried one.
    Close(Option<(u16, String)>),
}

/// Write half of a transport.
pub trait FrameSink: Send + 'static {
    fn send_text(
        &mut self,
        text: String,
    ) -> impl Future<Output = std::result::Result<(), tungstenite::Error>> + Send;

    fn send_ping(&mut self) -> impl Future<Output = std::result::Result<(), tungstenite::Error>> + Send;

    /// Send a close frame and flush.
    fn close(&mut self) -> impl Future<Output = std::result::Result<(), tungstenite::Error>> + Send;
}

/// Read half of a transport. `None` means the stream ended.
pub trait FrameSource: Send + 'static {
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Option<std::result::Result<Frame, tungstenite::Error>>> + Send;
}

/// Opens transports to one endpoint.
pub trait Connector: Send + Sync + 'static {
    type Sink: FrameSink;
    type Source: FrameSource;

    /// Open a new transport and split it into its two halves.
    fn open(
        &self,
    ) -> impl Future<Output = std::result::Result<(Self::Sink, Self::Source), tungstenite::Error>> + Send;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}

// ---------------------------------------------------------------------------
// Outbound half
// ---------------------------------------------------------------------------

/// The shareable write side of a connection.
///
/// Holds the current sink (swapped on every reconnect) and the connection
/// state. Cloning yields another handle to the same slot, so the supervisor
/// and the public client write through one lock.
pub struct Outbound<S> {
    writer: Arc<Mutex<Option<S>>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl<S> Clone for Outbound<S> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: FrameSink> Default for Outbound<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FrameSink> Outbound<S> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            writer: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::trace!(from = ?prev, to = ?next, "Connection state");
        }
    }

    /// Write one text frame. Fails fast unless authenticating or ready.
    ///
    /// A write error drops the sink and moves the connection to
    /// `Disconnected`; the reader will see the failure and the supervisor
    /// reconnects.
    pub async fn send(&self, text: String) -> Result<()> {
        let state = self.state();
        if !state.accepts_sends() {
            return Err(PolygonError::NotConnected { state });
        }
        let mut guard = self.writer.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(PolygonError::NotConnected {
                state: self.state(),
            });
        };
        if let Err(e) = sink.send_text(text).await {
            *guard = None;
            self.mark_dropped();
            return Err(PolygonError::Send(Box::new(e)));
        }
        Ok(())
    }

    /// Write a ping frame.
    pub async fn ping(&self) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(PolygonError::NotConnected {
                state: self.state(),
            });
        };
        if let Err(e) = sink.send_ping().await {
            *guard = None;
            self.mark_dropped();
            return Err(PolygonError::Send(Box::new(e)));
        }
        Ok(())
    }

    async fn install(&self, sink: S) {
        *self.writer.lock().await = Some(sink);
    }

    async fn take(&self) -> Option<S> {
        self.writer.lock().await.take()
    }

    fn mark_dropped(&self) {
        self.state.send_if_modified(|state| {
            if state.accepts_sends() || *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// What a successful `receive()` yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text payload (binary frames are decoded as UTF-8).
    Frame(String),
    /// A pong answering one of our pings.
    Pong,
}

/// A single authenticated session over a [`Connector`].
///
/// `connect()` can be called again after a drop to open a fresh transport;
/// the [`Outbound`] handle stays the same across sessions.
pub struct Connection<C: Connector> {
    connector: Arc<C>,
    api_key: String,
    outbound: Outbound<C::Sink>,
    reader: Option<C::Source>,
    connect_timeout: Duration,
}

impl<C: Connector> Connection<C> {
    /// A disconnected session for `connector`.
    pub fn new(connector: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_outbound(connector, api_key, Outbound::new())
    }

    pub(crate) fn with_outbound(
        connector: Arc<C>,
        api_key: impl Into<String>,
        outbound: Outbound<C::Sink>,
    ) -> Self {
        Self {
            connector,
            api_key: api_key.into(),
            outbound,
            reader: None,
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }

    /// Bound on opening the transport (TCP, TLS and WebSocket upgrade).
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.outbound.state()
    }

    /// The write handle shared with other tasks.
    pub fn outbound(&self) -> &Outbound<C::Sink> {
        &self.outbound
    }

    /// Open the transport and send the auth frame.
    ///
    /// Returns once the auth frame is written; `auth_success` arrives later
    /// through [`receive`](Self::receive).
    pub async fn connect(&mut self) -> Result<()> {
        self.open().await?;
        self.authenticate().await
    }

    /// Open the transport. The state stays `Connecting` until
    /// [`authenticate`](Self::authenticate), so nothing can be written yet.
    ///
    /// A handshake that does not finish within the connect timeout fails
    /// with [`PolygonError::ConnectTimeout`].
    pub async fn open(&mut self) -> Result<()> {
        self.release().await;
        self.outbound.set_state(ConnectionState::Connecting);

        let opened = tokio::time::timeout(self.connect_timeout, self.connector.open()).await;
        let (sink, source) = match opened {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                self.outbound.set_state(ConnectionState::Disconnected);
                return Err(PolygonError::Connect(Box::new(e)));
            }
            Err(_) => {
                self.outbound.set_state(ConnectionState::Disconnected);
                return Err(PolygonError::ConnectTimeout {
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                });
            }
        };
        self.outbound.install(sink).await;
        self.reader = Some(source);
        Ok(())
    }

    /// Send the auth frame on the transport opened by [`open`](Self::open).
    pub async fn authenticate(&mut self) -> Result<()> {
        if self.reader.is_none() {
            return Err(PolygonError::NotConnected {
                state: self.state(),
            });
        }
        self.outbound.set_state(ConnectionState::Authenticating);

        tracing::debug!(endpoint = %self.connector.endpoint(), "Transport open, authenticating");
        if let Err(e) = self.outbound.send(auth_frame(&self.api_key)?).await {
            self.reader = None;
            return Err(e);
        }
        Ok(())
    }

    /// Send a text frame on the current transport.
    pub async fn send(&self, text: String) -> Result<()> {
        self.outbound.send(text).await
    }

    /// Wait for the next inbound payload.
    ///
    /// Pings are answered by the transport and skipped. Any error other than
    /// [`ReceiveError::NotConnected`] ends the session: the reader is
    /// released and the state drops to `Disconnected`.
    pub async fn receive(&mut self) -> std::result::Result<Inbound, ReceiveError> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Err(ReceiveError::NotConnected);
            };
            let err = match reader.next_frame().await {
                Some(Ok(Frame::Text(text))) => return Ok(Inbound::Frame(text)),
                Some(Ok(Frame::Binary(data))) => {
                    return Ok(Inbound::Frame(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Frame::Pong)) => return Ok(Inbound::Pong),
                Some(Ok(Frame::Ping)) => continue,
                Some(Ok(Frame::Close(Some((code, reason))))) if code == 1000 => {
                    ReceiveError::Closed { code, reason }
                }
                Some(Ok(Frame::Close(Some((code, reason))))) => ReceiveError::Abnormal {
                    code: Some(code),
                    reason,
                },
                // RFC 6455 "no status received"
                Some(Ok(Frame::Close(None))) => ReceiveError::Closed {
                    code: 1005,
                    reason: String::new(),
                },
                Some(Err(e)) => ReceiveError::Transport(Box::new(e)),
                None => ReceiveError::Abnormal {
                    code: None,
                    reason: "stream ended without a close frame".into(),
                },
            };
            self.reader = None;
            self.outbound.take().await;
            self.outbound.mark_dropped();
            return Err(err);
        }
    }

    /// `auth_success` was received.
    pub fn mark_ready(&self) {
        if self.state() == ConnectionState::Authenticating {
            self.outbound.set_state(ConnectionState::Ready);
        }
    }

    /// The key was rejected. Releases the transport; the state stays
    /// `Failed` from here on.
    pub async fn mark_failed(&mut self) {
        self.outbound.set_state(ConnectionState::Failed);
        self.release().await;
    }

    /// Drop the transport without a close handshake. The state is left
    /// alone.
    pub async fn release(&mut self) {
        self.reader = None;
        drop(self.outbound.take().await);
    }

    /// Close the transport. Calling it again is a no-op.
    pub async fn close(&mut self) {
        let state = self.state();
        if state.is_terminal() {
            self.release().await;
            return;
        }
        self.outbound.set_state(ConnectionState::Closing);
        if let Some(mut sink) = self.outbound.take().await {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Close handshake failed");
            }
        }
        self.reader = None;
        self.outbound.set_state(ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_gating() {
        use ConnectionState::*;
        for state in [Disconnected, Connecting, Closing, Closed, Failed] {
            assert!(!state.accepts_sends(), "{state:?}");
        }
        assert!(Authenticating.accepts_sends());
        assert!(Ready.accepts_sends());
    }

    #[test]
    fn subscription_gating_follows_replay_gate() {
        use ConnectionState::*;
        assert!(Authenticating.accepts_subscriptions(ReplayGate::OnConnect));
        assert!(!Authenticating.accepts_subscriptions(ReplayGate::OnAuthSuccess));
        assert!(Ready.accepts_subscriptions(ReplayGate::OnAuthSuccess));
    }
}
