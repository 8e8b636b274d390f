//! Scripted in-memory client for pool tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use esox_connpool::{BoxError, Client, ErrorHandler, PoolEvent};
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast};

/// Behaviour of the clients a backend hands out
#[derive(Debug, Clone, Default)]
pub struct MockSettings {
    /// How long `connect` takes
    pub connect_delay: Duration,
    /// Keep connecting after `abort` instead of failing
    pub ignore_abort: bool,
    /// Number of upcoming clients whose connect fails
    pub fail_connects: usize,
    /// Make `close` report an error
    pub fail_close: bool,
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub created: AtomicUsize,
    pub connected: AtomicUsize,
    pub aborted: AtomicUsize,
    pub closed: AtomicUsize,
}

impl MockStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockBackend {
    settings: Mutex<MockSettings>,
    pub stats: Arc<MockStats>,
}

impl MockBackend {
    pub fn new(settings: MockSettings) -> Arc<Self> {
        Arc::new(Self {
            settings: Mutex::new(settings),
            stats: Arc::new(MockStats::default()),
        })
    }

    pub fn update(&self, change: impl FnOnce(&mut MockSettings)) {
        change(&mut self.settings.lock());
    }

    /// Client constructor to hand to `Pool::new`
    pub fn factory(self: &Arc<Self>) -> impl Fn() -> MockClient + Send + Sync + 'static {
        let backend = Arc::clone(self);
        move || backend.create()
    }

    fn create(&self) -> MockClient {
        let serial = self.stats.created.fetch_add(1, Ordering::SeqCst) + 1;
        let mut settings = self.settings.lock();
        let fail_connect = settings.fail_connects > 0;
        if fail_connect {
            settings.fail_connects -= 1;
        }

        MockClient {
            serial,
            settings: (*settings).clone(),
            fail_connect,
            stats: Arc::clone(&self.stats),
            abort_signal: Notify::new(),
            closed: AtomicBool::new(false),
            handler: Mutex::new(None),
        }
    }
}

pub struct MockClient {
    pub serial: usize,
    settings: MockSettings,
    fail_connect: bool,
    stats: Arc<MockStats>,
    abort_signal: Notify,
    closed: AtomicBool,
    handler: Mutex<Option<ErrorHandler>>,
}

impl MockClient {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate the connection failing underneath its user
    pub fn emit_error(&self, message: &str) {
        if let Some(handler) = self.handler.lock().as_ref() {
            handler(BoxError::from(message));
        }
    }
}

#[async_trait]
impl Client for MockClient {
    type Param = String;
    type Output = String;

    async fn connect(&self) -> Result<(), BoxError> {
        let delay = self.settings.connect_delay;
        if !delay.is_zero() {
            if self.settings.ignore_abort {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.abort_signal.notified() => {
                        return Err("connection aborted".into());
                    }
                }
            }
        }

        if self.fail_connect {
            return Err("connection refused".into());
        }
        self.stats.connected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, text: &str, _params: &[String]) -> Result<String, BoxError> {
        if self.is_closed() {
            return Err("client is closed".into());
        }
        if text.starts_with("FAIL") {
            return Err(format!("syntax error at {text:?}").into());
        }
        Ok(text.to_string())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.closed.store(true, Ordering::SeqCst);
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        if self.settings.fail_close {
            return Err("close failed".into());
        }
        Ok(())
    }

    fn abort(&self) {
        self.stats.aborted.fetch_add(1, Ordering::SeqCst);
        self.abort_signal.notify_one();
    }

    fn on_error(&self, handler: ErrorHandler) {
        *self.handler.lock() = Some(handler);
    }
}

/// Everything received so far, without waiting
pub fn drain_events(
    events: &mut broadcast::Receiver<PoolEvent<MockClient>>,
) -> Vec<PoolEvent<MockClient>> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

/// Let spawned pool tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
