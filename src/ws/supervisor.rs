//! The background task that keeps one stream alive.
//!
//! The supervisor owns the [`Connection`] and loops through
//!
//! ```text
//!   Idle ─▶ Connecting ─▶ Streaming ──drop──▶ Reconnecting ─┐
//!                ▲                                          │
//!                └──────────── delay elapsed ───────────────┘
//!
//!   any state ─▶ Terminated  (close(), auth_failed, attempts exhausted)
//! ```
//!
//! While streaming it reads frames, decodes each one as a JSON array and
//! dispatches the messages in array order. Every (re)connect replays the
//! subscription ledger while holding the ledger lock, so a concurrent
//! `subscribe()` either lands in the replay or is sent after it, never both.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::{Mutex, Notify, Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until, timeout};

use crate::error::{PolygonError, ReceiveError, Result};
use crate::types::{Message, StatusKind, StreamCluster};
use crate::ws::codec::control_frame;
use crate::ws::config::{DispatchMode, ReplayGate, StreamConfig};
use crate::ws::connection::{Connection, Connector, Inbound, Outbound};
use crate::ws::handlers::HandlerTable;
use crate::ws::ledger::Ledger;

// ---------------------------------------------------------------------------
// Public state
// ---------------------------------------------------------------------------

/// Lifecycle of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SupervisorState {
    /// Not started.
    #[default]
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and reading.
    Streaming,
    /// Waiting for, or running, a reconnect attempt.
    Reconnecting,
    /// Finished. See [`Termination`].
    Terminated,
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `close()` was called.
    Closed,
    /// The gateway answered `auth_failed`.
    AuthRejected { message: String },
    /// Reconnect attempts ran out.
    ReconnectLimit { attempts: u32, last_error: String },
    /// The stream dropped and reconnection is disabled, or the supervisor
    /// itself failed.
    Failed { reason: String },
}

impl Termination {
    /// `Ok(())` for a requested close, the matching error otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Closed => Ok(()),
            Self::AuthRejected { message } => Err(PolygonError::AuthRejected { message }),
            Self::ReconnectLimit {
                attempts,
                last_error,
            } => Err(PolygonError::ReconnectLimit {
                attempts,
                last_error,
            }),
            Self::Failed { reason } => Err(PolygonError::StreamFailed { reason }),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the supervisor task and the client handle.
pub(crate) struct Shared<C: Connector> {
    pub(crate) config: StreamConfig,
    pub(crate) outbound: Outbound<C::Sink>,
    pub(crate) ledger: Mutex<Ledger>,
    pub(crate) handlers: HandlerTable,
    pub(crate) phase: watch::Sender<SupervisorState>,
    /// Attempts since the last `auth_success`.
    pub(crate) attempts: AtomicU32,
    pub(crate) total_reconnects: AtomicU64,
    pub(crate) termination: watch::Sender<Option<Termination>>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) reconnect_requested: Notify,
    pub(crate) handler_slots: Arc<Semaphore>,
    pub(crate) raw_tx: Option<broadcast::Sender<Bytes>>,
}

impl<C: Connector> Shared<C> {
    pub(crate) fn new(config: StreamConfig) -> Self {
        let raw_tx = config
            .enable_raw_frames
            .then(|| broadcast::channel(config.raw_channel_capacity).0);
        Self {
            handler_slots: Arc::new(Semaphore::new(config.max_in_flight_handlers)),
            outbound: Outbound::new(),
            ledger: Mutex::new(Ledger::new()),
            handlers: HandlerTable::new(),
            phase: watch::channel(SupervisorState::Idle).0,
            attempts: AtomicU32::new(0),
            total_reconnects: AtomicU64::new(0),
            termination: watch::channel(None).0,
            shutdown: watch::channel(false).0,
            reconnect_requested: Notify::new(),
            raw_tx,
            config,
        }
    }

    pub(crate) fn cluster(&self) -> StreamCluster {
        self.config.cluster
    }

    pub(crate) fn set_phase(&self, phase: SupervisorState) {
        self.phase.send_if_modified(|current| {
            if *current == phase || *current == SupervisorState::Terminated {
                false
            } else {
                *current = phase;
                true
            }
        });
    }

    /// Publish the end of the run. Only the first termination sticks.
    pub(crate) fn finish(&self, termination: Termination) {
        self.phase.send_replace(SupervisorState::Terminated);
        self.termination.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = Some(termination);
                true
            }
        });
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.termination.borrow().is_some()
    }
}

/// Write every ledger entry to the current connection.
pub(crate) async fn replay<S>(outbound: &Outbound<S>, ledger: &Ledger) -> Result<()>
where
    S: crate::ws::connection::FrameSink,
{
    let frames = ledger.snapshot();
    for (params, action) in &frames {
        outbound.send(control_frame(*action, params)?).await?;
    }
    if !frames.is_empty() {
        tracing::info!(entries = frames.len(), "Replayed subscriptions");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// How one streaming session ended.
enum Exit {
    Shutdown,
    Recycle,
    AuthRejected(String),
    Dropped(String),
}

enum Backoff {
    Retry,
    Shutdown,
    GiveUp(Termination),
}

pub(crate) struct Supervisor<C: Connector> {
    shared: Arc<Shared<C>>,
    connection: Connection<C>,
    tasks: JoinSet<()>,
}

impl<C: Connector> Supervisor<C> {
    pub(crate) fn new(shared: Arc<Shared<C>>, connection: Connection<C>) -> Self {
        Self {
            shared,
            connection,
            tasks: JoinSet::new(),
        }
    }

    /// Run until closed, rejected, or out of attempts.
    pub(crate) async fn run(mut self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        let cluster = self.shared.cluster();
        self.shared.set_phase(SupervisorState::Connecting);
        tracing::info!(%cluster, "Stream supervisor started");

        let termination = loop {
            let established = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => break Termination::Closed,
                r = self.establish() => r,
            };

            let last_error = match established {
                Ok(()) => {
                    // A reconnect requested while this session was being
                    // established is already satisfied by it.
                    if self.shared.reconnect_requested.notified().now_or_never().is_some() {
                        tracing::debug!(%cluster, "Dropping reconnect request made while connecting");
                    }
                    self.shared.set_phase(SupervisorState::Streaming);
                    tracing::info!(%cluster, "Stream connected");
                    match self.stream(&mut shutdown).await {
                        Exit::Shutdown => break Termination::Closed,
                        Exit::AuthRejected(message) => {
                            tracing::error!(%cluster, message = %message, "API key rejected; not reconnecting");
                            self.connection.mark_failed().await;
                            break Termination::AuthRejected { message };
                        }
                        Exit::Recycle => {
                            tracing::info!(%cluster, "Reconnect requested");
                            self.connection.release().await;
                            self.shared.attempts.store(0, Ordering::SeqCst);
                            self.shared.total_reconnects.fetch_add(1, Ordering::SeqCst);
                            self.shared.set_phase(SupervisorState::Reconnecting);
                            continue;
                        }
                        Exit::Dropped(error) => error,
                    }
                }
                Err(e) => {
                    tracing::warn!(%cluster, error = %e, "Connect failed");
                    e.to_string()
                }
            };

            match self.backoff(&mut shutdown, last_error).await {
                Backoff::Retry => continue,
                Backoff::Shutdown => break Termination::Closed,
                Backoff::GiveUp(termination) => break termination,
            }
        };

        self.shutdown_tasks().await;
        if termination == Termination::Closed {
            self.connection.close().await;
        } else {
            self.connection.release().await;
        }
        tracing::info!(%cluster, reason = ?termination, "Stream supervisor stopped");
        self.shared.finish(termination);
    }

    /// Connect, authenticate and (for the default gate) replay.
    ///
    /// The ledger lock is taken once the transport is open and held until
    /// the replay is written, so a stalled handshake never blocks callers.
    async fn establish(&mut self) -> Result<()> {
        self.connection.open().await?;
        let ledger = self.shared.ledger.lock().await;
        self.connection.authenticate().await?;
        if self.shared.config.replay_gate == ReplayGate::OnConnect {
            replay(self.connection.outbound(), &ledger).await?;
        }
        Ok(())
    }

    async fn stream(&mut self, shutdown: &mut watch::Receiver<bool>) -> Exit {
        let outbound = self.shared.outbound.clone();
        let pong_timeout = self.shared.config.pong_timeout;
        let mut ping = self.shared.config.ping_interval.map(|every| {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(shutdown) => return Exit::Shutdown,
                _ = self.shared.reconnect_requested.notified() => return Exit::Recycle,
                received = self.connection.receive() => match received {
                    Ok(Inbound::Pong) => pong_deadline = None,
                    Ok(Inbound::Frame(raw)) => {
                        if let Some(exit) = self.dispatch_frame(raw).await {
                            return exit;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(cluster = %self.shared.cluster(), error = %e, "Stream dropped");
                        return Exit::Dropped(e.to_string());
                    }
                },
                _ = tick(&mut ping) => {
                    if let Err(e) = outbound.ping().await {
                        return Exit::Dropped(e.to_string());
                    }
                    pong_deadline.get_or_insert_with(|| Instant::now() + pong_timeout);
                }
                _ = until(pong_deadline) => {
                    let e = ReceiveError::PongTimeout {
                        timeout_ms: pong_timeout.as_millis() as u64,
                    };
                    tracing::warn!(cluster = %self.shared.cluster(), error = %e, "Stream dropped");
                    self.connection.release().await;
                    return Exit::Dropped(e.to_string());
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Handler task panicked");
                        }
                    }
                }
            }
        }
    }

    /// Decode one frame and dispatch its messages in order.
    async fn dispatch_frame(&mut self, raw: String) -> Option<Exit> {
        if let Some(tx) = &self.shared.raw_tx {
            let _ = tx.send(Bytes::from(raw.clone()));
        }

        let messages = match Message::parse_frame(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return None;
            }
        };

        for msg in messages {
            match msg.status() {
                Some(StatusKind::AuthSuccess) => self.on_auth_success().await,
                Some(StatusKind::AuthFailed) => {
                    let message = msg
                        .status_message()
                        .unwrap_or("authentication failed")
                        .to_owned();
                    self.invoke(msg).await;
                    return Some(Exit::AuthRejected(message));
                }
                _ => {}
            }
            self.invoke(msg).await;
        }
        None
    }

    async fn on_auth_success(&mut self) {
        self.shared.attempts.store(0, Ordering::SeqCst);
        match self.shared.config.replay_gate {
            ReplayGate::OnConnect => self.connection.mark_ready(),
            ReplayGate::OnAuthSuccess => {
                let ledger = self.shared.ledger.lock().await;
                self.connection.mark_ready();
                if let Err(e) = replay(self.connection.outbound(), &ledger).await {
                    tracing::warn!(error = %e, "Replay after auth_success failed");
                }
            }
        }
        tracing::debug!(cluster = %self.shared.cluster(), "Authenticated");
    }

    /// Run the handler for one message under the configured dispatch mode.
    async fn invoke(&mut self, msg: Message) {
        let handler = self.shared.handlers.resolve(msg.ev());
        let ev = msg.ev().to_owned();
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(msg))) {
            Ok(future) => future,
            Err(panic) => {
                tracing::error!(ev = %ev, panic = panic_message(&panic), "Handler panicked");
                return;
            }
        };
        let budget = self.shared.config.handler_budget;

        match self.shared.config.dispatch_mode {
            DispatchMode::Inline => {
                match timeout(budget, AssertUnwindSafe(future).catch_unwind()).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => tracing::warn!(ev = %ev, error = %e, "Handler failed"),
                    Ok(Err(panic)) => {
                        tracing::error!(ev = %ev, panic = panic_message(&panic), "Handler panicked");
                    }
                    Err(_) => tracing::warn!(
                        ev = %ev,
                        budget_ms = budget.as_millis() as u64,
                        "Handler exceeded its budget; abandoned"
                    ),
                }
            }
            DispatchMode::Spawn => {
                let slots = Arc::clone(&self.shared.handler_slots);
                let permit = match timeout(budget, slots.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return,
                    Err(_) => {
                        tracing::warn!(
                            ev = %ev,
                            in_flight = self.tasks.len(),
                            "All handler slots busy; dropping message"
                        );
                        return;
                    }
                };
                self.tasks.spawn(async move {
                    let _permit = permit;
                    match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(ev = %ev, error = %e, "Handler failed"),
                        Err(panic) => {
                            tracing::error!(ev = %ev, panic = panic_message(&panic), "Handler panicked");
                        }
                    }
                });
            }
        }
    }

    /// Decide whether and when to try again.
    async fn backoff(&mut self, shutdown: &mut watch::Receiver<bool>, last_error: String) -> Backoff {
        let policy = &self.shared.config.reconnect;
        let cluster = self.shared.cluster();
        if !policy.enabled {
            return Backoff::GiveUp(Termination::Failed { reason: last_error });
        }
        let attempts = self.shared.attempts.load(Ordering::SeqCst);
        if let Some(max) = policy.max_attempts {
            if attempts >= max {
                tracing::error!(%cluster, attempts, error = %last_error, "Reconnect attempts exhausted");
                return Backoff::GiveUp(Termination::ReconnectLimit {
                    attempts,
                    last_error,
                });
            }
        }

        let attempt = attempts + 1;
        self.shared.attempts.store(attempt, Ordering::SeqCst);
        self.shared.total_reconnects.fetch_add(1, Ordering::SeqCst);
        self.shared.set_phase(SupervisorState::Reconnecting);
        tracing::warn!(
            %cluster,
            attempt,
            max_attempts = ?policy.max_attempts,
            delay_ms = policy.delay.as_millis() as u64,
            error = %last_error,
            "Reconnecting"
        );

        tokio::select! {
            biased;
            _ = shutdown_signalled(shutdown) => Backoff::Shutdown,
            _ = self.shared.reconnect_requested.notified() => Backoff::Retry,
            _ = sleep(policy.delay) => Backoff::Retry,
        }
    }

    /// Give in-flight handler tasks the grace period, then abort the rest.
    async fn shutdown_tasks(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let grace = self.shared.config.shutdown_grace;
        let drained = timeout(grace, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                grace_ms = grace.as_millis() as u64,
                "Aborting handler tasks still running after shutdown grace"
            );
            self.tasks.abort_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_maps_to_errors() {
        assert!(Termination::Closed.into_result().is_ok());
        assert!(matches!(
            Termination::AuthRejected {
                message: "bad".into()
            }
            .into_result(),
            Err(PolygonError::AuthRejected { .. })
        ));
        assert!(matches!(
            Termination::ReconnectLimit {
                attempts: 2,
                last_error: "refused".into()
            }
            .into_result(),
            Err(PolygonError::ReconnectLimit { attempts: 2, .. })
        ));
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&boxed), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&boxed), "non-string panic payload");
    }
}
