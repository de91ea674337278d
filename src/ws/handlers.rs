//! Event-code → handler routing.
//!
//! Handlers are looked up by the `ev` field of each inbound message. The
//! table can be changed at any time, including while the dispatch loop is
//! running: every mutation swaps in a fresh copy of the routes, so a lookup
//! sees either the old table or the new one and never a mix.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;

use crate::error::HandlerError;
use crate::types::{Message, StatusKind};

/// What a handler returns.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Boxed future produced by [`Handler::call`].
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Something that can process one [`Message`].
///
/// Implemented for every `Fn(Message) -> impl Future<Output = HandlerResult>`,
/// so async closures work directly:
///
/// ```
/// use polygon_stream::ws::handlers::{Handler, HandlerResult};
/// use polygon_stream::types::Message;
///
/// fn takes(_: impl Handler) {}
/// takes(|msg: Message| async move {
///     println!("{}", msg.ev());
///     HandlerResult::Ok(())
/// });
/// ```
///
/// Wrap plain synchronous callbacks with [`handler_fn`].
pub trait Handler: Send + Sync + 'static {
    /// Start handling `msg`.
    fn call(&self, msg: Message) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, msg: Message) -> HandlerFuture {
        Box::pin(self(msg))
    }
}

/// Adapter for synchronous callbacks. See [`handler_fn`].
pub struct SyncHandler<F>(Arc<F>);

impl<F> Handler for SyncHandler<F>
where
    F: Fn(Message) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, msg: Message) -> HandlerFuture {
        let f = Arc::clone(&self.0);
        // The callback runs when the future is polled, so the dispatcher's
        // panic guard covers it.
        Box::pin(async move { f(msg) })
    }
}

/// Turn a synchronous callback into a [`Handler`].
///
/// ```
/// use polygon_stream::ws::handlers::handler_fn;
///
/// let h = handler_fn(|msg| {
///     println!("{:?}", msg.symbol());
///     Ok(())
/// });
/// # let _ = h;
/// ```
pub fn handler_fn<F>(f: F) -> SyncHandler<F>
where
    F: Fn(Message) -> HandlerResult + Send + Sync + 'static,
{
    SyncHandler(Arc::new(f))
}

// ---------------------------------------------------------------------------
// Default handler
// ---------------------------------------------------------------------------

/// Fallback for event codes with no registered handler.
///
/// Logs control messages at a level matching their status and ignores
/// market events.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl DefaultHandler {
    fn log(msg: &Message) {
        let text = msg.status_message().unwrap_or_default();
        match msg.status() {
            Some(StatusKind::Connected | StatusKind::AuthSuccess | StatusKind::Success) => {
                tracing::info!(status = ?msg.status(), message = text, "Stream status");
            }
            Some(StatusKind::AuthFailed) => {
                tracing::error!(message = text, "Authentication failed");
            }
            Some(StatusKind::Error | StatusKind::Other(_)) => {
                tracing::warn!(status = ?msg.status(), message = text, "Stream status");
            }
            None if msg.is_status() => {
                tracing::warn!(fields = ?msg.fields, "Status message without a status field");
            }
            None => {
                tracing::trace!(ev = msg.ev(), "No handler for event");
            }
        }
    }
}

impl Handler for DefaultHandler {
    fn call(&self, msg: Message) -> HandlerFuture {
        Self::log(&msg);
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// Handler table
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Routes {
    by_code: HashMap<String, Arc<dyn Handler>>,
    default: Arc<dyn Handler>,
}

/// Shared, copy-on-write routing table.
///
/// Cloning the table yields another handle to the same routes.
#[derive(Clone)]
pub struct HandlerTable {
    routes: Arc<RwLock<Arc<Routes>>>,
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("codes", &self.codes())
            .finish()
    }
}

impl HandlerTable {
    /// An empty table that routes everything to [`DefaultHandler`].
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(Arc::new(Routes {
                by_code: HashMap::new(),
                default: Arc::new(DefaultHandler),
            }))),
        }
    }

    fn current(&self) -> Arc<Routes> {
        Arc::clone(&self.routes.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update(&self, f: impl FnOnce(&mut Routes)) {
        let mut guard = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Routes::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Route `event_code` to `handler`, replacing any previous handler.
    pub fn register(&self, event_code: impl Into<String>, handler: impl Handler) {
        let code = event_code.into();
        tracing::debug!(ev = %code, "Registering handler");
        let handler: Arc<dyn Handler> = Arc::new(handler);
        self.update(move |routes| {
            routes.by_code.insert(code, handler);
        });
    }

    /// Remove the handler for `event_code`. Returns whether one existed.
    pub fn remove(&self, event_code: &str) -> bool {
        let mut existed = false;
        self.update(|routes| existed = routes.by_code.remove(event_code).is_some());
        existed
    }

    /// Replace the fallback handler.
    pub fn set_default(&self, handler: impl Handler) {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        self.update(move |routes| routes.default = handler);
    }

    /// The handler for `event_code`, falling back to the default.
    pub fn resolve(&self, event_code: &str) -> Arc<dyn Handler> {
        let routes = self.current();
        routes
            .by_code
            .get(event_code)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&routes.default))
    }

    /// Whether a specific handler is registered for `event_code`.
    pub fn contains(&self, event_code: &str) -> bool {
        self.current().by_code.contains_key(event_code)
    }

    /// Registered event codes, sorted.
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.current().by_code.keys().cloned().collect();
        codes.sort();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Handler {
        let log = Arc::clone(log);
        handler_fn(move |msg| {
            log.lock().unwrap().push(format!("{tag}:{}", msg.ev()));
            Ok(())
        })
    }

    #[tokio::test]
    async fn resolves_registered_then_default() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = HandlerTable::new();
        table.register("T", recorder(&log, "trades"));
        table.set_default(recorder(&log, "default"));

        table.resolve("T").call(Message::new("T", json!({}))).await.unwrap();
        table.resolve("Q").call(Message::new("Q", json!({}))).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["trades:T", "default:Q"]);
    }

    #[tokio::test]
    async fn register_replaces_and_remove_falls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = HandlerTable::new();
        table.set_default(recorder(&log, "default"));
        table.register("AM", recorder(&log, "first"));
        table.register("AM", recorder(&log, "second"));

        table.resolve("AM").call(Message::new("AM", json!({}))).await.unwrap();
        assert!(table.remove("AM"));
        assert!(!table.remove("AM"));
        table.resolve("AM").call(Message::new("AM", json!({}))).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["second:AM", "default:AM"]);
    }

    #[tokio::test]
    async fn resolved_handler_survives_table_swap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = HandlerTable::new();
        table.register("T", recorder(&log, "old"));

        let held = table.resolve("T");
        table.register("T", recorder(&log, "new"));
        held.call(Message::new("T", json!({}))).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["old:T"]);
        assert_eq!(table.codes(), vec!["T"]);
    }

    #[tokio::test]
    async fn async_closures_are_handlers() {
        let table = HandlerTable::new();
        table.register("XT", |_msg: Message| async move {
            Err::<(), HandlerError>("boom".into())
        });
        let out = table.resolve("XT").call(Message::new("XT", json!({}))).await;
        assert_eq!(out.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn default_handler_accepts_status_and_market_events() {
        let h = DefaultHandler;
        h.call(Message::new("status", json!({"status": "auth_failed"})))
            .await
            .unwrap();
        h.call(Message::new("T", json!({"sym": "AMD"}))).await.unwrap();
    }
}
