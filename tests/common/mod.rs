//! Scripted in-memory transport shared by the integration tests.
//!
//! Each call to `open()` consumes the next script. A script of `None`
//! refuses the connection; so does running out of scripts. The steps of a
//! script are delivered in order, then the session stays idle until a test
//! injects more steps or the client hangs up.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use polygon_stream::ws::connection::{Connector, Frame, FrameSink, FrameSource};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

/// One inbound event of a scripted session.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Pong,
    Close(u16, String),
    /// Transport error (connection reset).
    Fail,
}

impl Step {
    pub fn text(raw: impl Into<String>) -> Self {
        Self::Text(raw.into())
    }

    pub fn close(code: u16, reason: &str) -> Self {
        Self::Close(code, reason.to_owned())
    }
}

/// `connected` followed by `auth_success`, as the gateway sends them.
pub fn auth_ok() -> Vec<Step> {
    vec![connected(), auth_success()]
}

pub fn connected() -> Step {
    Step::text(r#"[{"ev":"status","status":"connected","message":"Connected Successfully"}]"#)
}

pub fn auth_success() -> Step {
    Step::text(r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#)
}

pub fn auth_failed() -> Vec<Step> {
    vec![
        connected(),
        Step::text(r#"[{"ev":"status","status":"auth_failed","message":"authentication failed"}]"#),
    ]
}

/// How long an `open()` call hangs before it proceeds.
#[derive(Debug, Clone, Copy)]
enum Hold {
    For(Duration),
    Forever,
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<VecDeque<Option<Vec<Step>>>>,
    holds: Mutex<VecDeque<Hold>>,
    sent: Mutex<Vec<(usize, String)>>,
    connects: AtomicUsize,
    live: Mutex<Option<mpsc::UnboundedSender<Step>>>,
    silent: AtomicBool,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<Inner>,
}

impl ScriptedConnector {
    pub fn new(scripts: impl IntoIterator<Item = Option<Vec<Step>>>) -> Self {
        let connector = Self::default();
        connector.inner.scripts.lock().unwrap().extend(scripts);
        connector
    }

    /// A connector that refuses every connection.
    pub fn refusing() -> Self {
        Self::default()
    }

    /// The next `open()` never completes.
    pub fn stall_next_open(&self) {
        self.inner.holds.lock().unwrap().push_back(Hold::Forever);
    }

    /// The next `open()` takes `delay` before it proceeds.
    pub fn delay_next_open(&self, delay: Duration) {
        self.inner.holds.lock().unwrap().push_back(Hold::For(delay));
    }

    /// Stop answering pings.
    pub fn go_silent(&self) {
        self.inner.silent.store(true, Ordering::SeqCst);
    }

    /// Deliver `step` on the most recent session.
    pub fn inject(&self, step: Step) {
        if let Some(tx) = self.inner.live.lock().unwrap().as_ref() {
            let _ = tx.send(step);
        }
    }

    /// Number of `open()` calls, refused ones included.
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Every frame the client wrote, tagged with the session index.
    pub fn sent(&self) -> Vec<(usize, String)> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Frames written on session `index`.
    pub fn sent_on(&self, index: usize) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, text)| text)
            .collect()
    }
}

impl Connector for ScriptedConnector {
    type Sink = ScriptedSink;
    type Source = ScriptedSource;

    async fn open(&self) -> Result<(ScriptedSink, ScriptedSource), tungstenite::Error> {
        let index = self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let hold = self.inner.holds.lock().unwrap().pop_front();
        match hold {
            Some(Hold::For(delay)) => tokio::time::sleep(delay).await,
            Some(Hold::Forever) => std::future::pending::<()>().await,
            None => {}
        }
        let script = self.inner.scripts.lock().unwrap().pop_front().flatten();
        let Some(steps) = script else {
            return Err(tungstenite::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            )));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for step in steps {
            let _ = tx.send(step);
        }
        *self.inner.live.lock().unwrap() = Some(tx.clone());

        Ok((
            ScriptedSink {
                index,
                inner: Arc::clone(&self.inner),
                inbound: tx,
            },
            ScriptedSource { rx },
        ))
    }

    fn endpoint(&self) -> String {
        "scripted://test".into()
    }
}

pub struct ScriptedSink {
    index: usize,
    inner: Arc<Inner>,
    inbound: mpsc::UnboundedSender<Step>,
}

impl FrameSink for ScriptedSink {
    async fn send_text(&mut self, text: String) -> Result<(), tungstenite::Error> {
        self.inner.sent.lock().unwrap().push((self.index, text));
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), tungstenite::Error> {
        if !self.inner.silent.load(Ordering::SeqCst) {
            let _ = self.inbound.send(Step::Pong);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), tungstenite::Error> {
        Ok(())
    }
}

pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<Step>,
}

impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, tungstenite::Error>> {
        let frame = match self.rx.recv().await? {
            Step::Text(text) => Frame::Text(text),
            Step::Pong => Frame::Pong,
            Step::Close(code, reason) => Frame::Close(Some((code, reason))),
            Step::Fail => {
                return Some(Err(tungstenite::Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "scripted reset",
                ))));
            }
        };
        Some(Ok(frame))
    }
}

/// Poll `cond` until it holds, failing the test after `limit`.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) {
    let started = tokio::time::Instant::now();
    while !cond() {
        assert!(
            started.elapsed() < limit,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
