//! Connection pool and acquisition scheduler

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::client::{Client, ClientId};
use crate::completion::{Completion, Pending, complete_with, completion};
use crate::config::PoolConfiguration;
use crate::errors::{ClientError, PoolError, PoolResult};
use crate::events::{EventBus, PoolEvent, RemoveReason};
use crate::health::HealthStatus;
use crate::idle::IdleRegistry;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::metrics::{MetricsTracker, PoolMetrics};

/// Single-use capability that returns a checked-out client to its pool.
///
/// Calling [`release`](Release::release) a second time fails with
/// [`PoolError::DoubleRelease`] and leaves the pool untouched. Dropping an
/// unreleased capability returns the client as a normal release.
pub struct Release<C: Client> {
    id: ClientId,
    pool: Weak<PoolInner<C>>,
    consumed: AtomicBool,
}

impl<C: Client> Release<C> {
    fn new(id: ClientId, pool: Weak<PoolInner<C>>) -> Self {
        Self {
            id,
            pool,
            consumed: AtomicBool::new(false),
        }
    }

    /// Return the client. Pass the error that made the client unusable to
    /// have it closed and removed instead of kept for reuse.
    pub fn release(&self, error: Option<ClientError>) -> PoolResult<()> {
        if self.consumed.swap(true, Ordering::AcqRel) {
            error!(client = %self.id, "release called on a client that was already released");
            return Err(PoolError::DoubleRelease);
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.id, error);
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn client_id(&self) -> ClientId {
        self.id
    }
}

impl<C: Client> Drop for Release<C> {
    fn drop(&mut self) {
        if !*self.consumed.get_mut() {
            *self.consumed.get_mut() = true;
            if let Some(pool) = self.pool.upgrade() {
                debug!(client = %self.id, "client dropped without release, returning it");
                pool.release(self.id, None);
            }
        }
    }
}

impl<C: Client> fmt::Debug for Release<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A client checked out of the pool.
///
/// Derefs to the client. The release capability travels with it; use
/// [`into_parts`](PooledClient::into_parts) to split them.
pub struct PooledClient<C: Client> {
    client: Arc<C>,
    release: Release<C>,
}

impl<C: Client> PooledClient<C> {
    fn new(id: ClientId, client: Arc<C>, pool: Weak<PoolInner<C>>) -> Self {
        Self {
            client,
            release: Release::new(id, pool),
        }
    }

    pub fn id(&self) -> ClientId {
        self.release.id
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// See [`Release::release`]
    pub fn release(&self, error: Option<ClientError>) -> PoolResult<()> {
        self.release.release(error)
    }

    pub fn into_parts(self) -> (Arc<C>, Release<C>) {
        (self.client, self.release)
    }
}

impl<C: Client> Deref for PooledClient<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<C: Client> fmt::Debug for PooledClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("id", &self.id())
            .field("released", &self.release.is_released())
            .finish()
    }
}

/// Bounded pool of client connections.
///
/// Cloning is cheap and every clone drives the same pool. Must be used from
/// within a Tokio runtime.
pub struct Pool<C: Client> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Client> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Client> Pool<C> {
    /// Create a pool that builds clients with `factory`.
    ///
    /// No client is created up front; connections are opened lazily by
    /// [`acquire`](Pool::acquire).
    pub fn new<F>(factory: F, config: PoolConfiguration) -> PoolResult<Self>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner::new(Box::new(factory), config)),
        })
    }

    /// Check out a client.
    ///
    /// The request is registered immediately; the returned future resolves
    /// once a client is connected or freed. Requests are served in arrival
    /// order and idle clients are reused most-recently-released first.
    pub fn acquire(&self) -> Pending<PooledClient<C>> {
        self.inner.acquire()
    }

    /// Handler-style [`acquire`](Pool::acquire): `handler` receives the client
    /// and its release capability as separate values.
    pub fn acquire_with<F>(&self, handler: F)
    where
        F: FnOnce(PoolResult<(Arc<C>, Release<C>)>) + Send + 'static,
    {
        let pending = self.acquire();
        complete_with(
            async move { pending.await.map(PooledClient::into_parts) },
            handler,
        );
    }

    /// Run one query on a pooled client.
    ///
    /// The client is always released afterwards. A failed query releases it
    /// with the error, so it is closed instead of reused.
    pub async fn query(&self, text: &str, params: &[C::Param]) -> PoolResult<C::Output> {
        let client = self.acquire().await?;
        match client.query(text, params).await {
            Ok(output) => {
                client.release(None)?;
                Ok(output)
            }
            Err(err) => {
                let err: ClientError = Arc::from(err);
                client.release(Some(Arc::clone(&err)))?;
                Err(PoolError::Query(err))
            }
        }
    }

    /// Handler-style [`query`](Pool::query)
    pub fn query_with<F>(&self, text: impl Into<String>, params: Vec<C::Param>, handler: F)
    where
        C::Param: 'static,
        F: FnOnce(PoolResult<C::Output>) + Send + 'static,
    {
        let pool = self.clone();
        let text = text.into();
        complete_with(async move { pool.query(&text, &params).await }, handler);
    }

    /// Shut the pool down.
    ///
    /// New acquisitions fail from the moment this is called. Every connected
    /// client is closed; the future resolves once all closes have finished,
    /// with the first close error if any. A client still connecting is
    /// closed by its connect attempt when that finishes, and its caller gets
    /// [`PoolError::PoolClosed`]. A second call fails with
    /// [`PoolError::AlreadyEnded`].
    pub fn end(&self) -> BoxFuture<'static, PoolResult<()>> {
        self.inner.end()
    }

    /// Handler-style [`end`](Pool::end)
    pub fn end_with<F>(&self, handler: F)
    where
        F: FnOnce(PoolResult<()>) + Send + 'static,
    {
        complete_with(self.end(), handler);
    }

    /// Subscribe to lifecycle events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent<C>> {
        self.inner.events.subscribe()
    }

    /// Callers waiting for a client
    pub fn waiting_count(&self) -> usize {
        self.inner.state.lock().waiting()
    }

    /// Clients sitting idle
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Clients tracked by the pool, including ones still connecting
    pub fn total_count(&self) -> usize {
        self.inner.state.lock().clients.len()
    }

    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    /// Whether `end` has been called
    pub fn is_ending(&self) -> bool {
        self.inner.state.lock().ending
    }

    /// Whether `end` has finished closing every client
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let mut state = self.inner.state.lock();
        HealthStatus::new(
            state.waiting(),
            state.idle.len(),
            state.clients.len(),
            self.inner.config.max_size,
            state.ending,
        )
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (waiting, idle, total) = {
            let mut state = self.inner.state.lock();
            (state.waiting(), state.idle.len(), state.clients.len())
        };
        self.inner
            .metrics
            .get_metrics(waiting, idle, total, self.inner.config.max_size)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }
}

impl<C: Client> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("waiting", &state.waiting())
            .field("idle", &state.idle.len())
            .field("total", &state.clients.len())
            .field("max_size", &self.inner.config.max_size)
            .field("ending", &state.ending)
            .finish()
    }
}

pub(crate) type Waiter<C> = Completion<PooledClient<C>>;

pub(crate) struct PoolState<C: Client> {
    /// Every client the pool tracks, connecting, idle or checked out
    pub clients: HashMap<ClientId, Arc<C>>,
    /// Clients whose connect has not finished yet
    pub connecting: HashSet<ClientId>,
    pub idle: IdleRegistry<C>,
    pub pending: VecDeque<Waiter<C>>,
    pub ending: bool,
}

impl<C: Client> PoolState<C> {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
            connecting: HashSet::new(),
            idle: IdleRegistry::new(),
            pending: VecDeque::new(),
            ending: false,
        }
    }

    pub fn is_full(&self, max_size: usize) -> bool {
        self.clients.len() >= max_size
    }

    /// Forget waiters whose caller dropped the acquire future
    pub fn prune_abandoned(&mut self) {
        self.pending.retain(|waiter| !waiter.is_abandoned());
    }

    /// Live waiters
    pub fn waiting(&mut self) -> usize {
        self.prune_abandoned();
        self.pending.len()
    }
}

/// Shared pool internals.
///
/// All state lives behind `state`. The lock is never held across an await,
/// while calling into a client, or while settling a waiter.
pub(crate) struct PoolInner<C: Client> {
    pub config: PoolConfiguration,
    pub factory: Box<dyn Fn() -> C + Send + Sync>,
    pub state: Mutex<PoolState<C>>,
    pub events: EventBus<C>,
    pub metrics: MetricsTracker,
    pub next_id: AtomicUsize,
    pub ended: AtomicBool,
}

enum Step<C: Client> {
    Reuse(Waiter<C>, PooledClient<C>),
    Connect(Waiter<C>, ClientId, Arc<C>),
    Reject(Vec<Waiter<C>>),
}

impl<C: Client> PoolInner<C> {
    fn new(factory: Box<dyn Fn() -> C + Send + Sync>, config: PoolConfiguration) -> Self {
        Self {
            events: EventBus::new(config.event_capacity),
            config,
            factory,
            state: Mutex::new(PoolState::new()),
            metrics: MetricsTracker::new(),
            next_id: AtomicUsize::new(1),
            ended: AtomicBool::new(false),
        }
    }

    /// Emit a lifecycle line to `tracing` and the configured logger
    pub(crate) fn log(&self, message: &str) {
        debug!("{message}");
        if let Some(logger) = self.config.logger {
            logger(message);
        }
    }

    fn acquire(self: &Arc<Self>) -> Pending<PooledClient<C>> {
        let mut state = self.state.lock();
        if state.ending {
            drop(state);
            debug!("acquire rejected, pool is ending");
            return Pending::ready(Err(PoolError::PoolClosed));
        }

        let (waiter, pending) = completion();

        // Room for a new client and nothing idle: connect straight away
        if !state.is_full(self.config.max_size) && state.idle.is_empty() {
            let (id, client) = self.reserve(&mut state);
            drop(state);
            self.spawn_connect(waiter, id, client);
            return pending;
        }

        state.prune_abandoned();
        state.pending.push_back(waiter);
        let waiting = state.pending.len();
        drop(state);

        debug!(waiting, "acquire queued");
        self.pulse();
        pending
    }

    /// Match queued waiters to idle clients or free capacity until neither
    /// is left.
    pub(crate) fn pulse(self: &Arc<Self>) {
        loop {
            let step = {
                let mut state = self.state.lock();
                match self.next_step(&mut state) {
                    Some(step) => step,
                    None => return,
                }
            };

            match step {
                Step::Reuse(waiter, client) => self.deliver(waiter, client),
                Step::Connect(waiter, id, client) => self.spawn_connect(waiter, id, client),
                Step::Reject(waiters) => {
                    for waiter in waiters {
                        let _ = waiter.settle(Err(PoolError::PoolClosed));
                    }
                }
            }
        }
    }

    fn next_step(self: &Arc<Self>, state: &mut PoolState<C>) -> Option<Step<C>> {
        while state.pending.front().is_some_and(Completion::is_abandoned) {
            state.pending.pop_front();
        }
        if state.pending.is_empty() {
            return None;
        }
        if state.ending {
            return Some(Step::Reject(state.pending.drain(..).collect()));
        }

        let full = state.is_full(self.config.max_size);
        if state.idle.is_empty() && full {
            return None;
        }

        let waiter = state.pending.pop_front()?;
        if let Some(entry) = state.idle.pop_latest() {
            debug!(
                client = %entry.id,
                idle_ms = entry.idle_for().as_millis() as u64,
                "reusing idle client"
            );
            let client = self.checkout(entry.id, entry.client);
            return Some(Step::Reuse(waiter, client));
        }
        if !full {
            let (id, client) = self.reserve(state);
            return Some(Step::Connect(waiter, id, client));
        }

        unreachable!("pulse found neither an idle client nor free capacity");
    }

    /// Hand a client to its caller
    pub(crate) fn checkout(self: &Arc<Self>, id: ClientId, client: Arc<C>) -> PooledClient<C> {
        MetricsTracker::increment(&self.metrics.total_acquired);
        self.events.emit(PoolEvent::Acquire {
            id,
            client: Arc::clone(&client),
        });
        PooledClient::new(id, client, Arc::downgrade(self))
    }

    pub(crate) fn deliver(&self, waiter: Waiter<C>, client: PooledClient<C>) {
        if let Err(Ok(client)) = waiter.settle(Ok(client)) {
            debug!(client = %client.id(), "caller went away, returning client");
            drop(client);
        }
    }

    fn end(self: &Arc<Self>) -> BoxFuture<'static, PoolResult<()>> {
        let (waiters, clients) = {
            let mut state = self.state.lock();
            if state.ending {
                drop(state);
                warn!("end called on a pool that is already ending");
                return Box::pin(async { Err(PoolError::AlreadyEnded) });
            }
            state.ending = true;
            state.idle.drain();
            let waiters: Vec<_> = state.pending.drain(..).collect();
            // Clients still connecting are closed by their connect task
            let connecting = std::mem::take(&mut state.connecting);
            let mut clients: Vec<_> = state
                .clients
                .drain()
                .filter(|(id, _)| !connecting.contains(id))
                .collect();
            clients.sort_by_key(|(id, _)| *id);
            (waiters, clients)
        };

        self.log(&format!("ending pool, closing {} clients", clients.len()));
        for waiter in waiters {
            let _ = waiter.settle(Err(PoolError::PoolClosed));
        }
        for (id, client) in &clients {
            MetricsTracker::increment(&self.metrics.total_removed);
            self.events.emit(PoolEvent::Remove {
                id: *id,
                client: Arc::clone(client),
                reason: RemoveReason::Shutdown,
            });
        }

        let pool = Arc::clone(self);
        let closing = tokio::spawn(async move {
            let results = join_all(clients.iter().map(|(_, client)| client.close())).await;
            pool.ended.store(true, Ordering::Release);

            match results.into_iter().find_map(Result::err) {
                Some(err) => {
                    warn!(error = %err, "client failed to close during shutdown");
                    Err(PoolError::Close(Arc::from(err)))
                }
                None => {
                    pool.log("pool ended");
                    Ok(())
                }
            }
        });

        Box::pin(async move {
            closing
                .await
                .unwrap_or_else(|err| Err(PoolError::Close(Arc::new(err))))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ErrorHandler;
    use crate::errors::BoxError;
    use async_trait::async_trait;

    struct EchoClient;

    #[async_trait]
    impl Client for EchoClient {
        type Param = String;
        type Output = String;

        async fn connect(&self) -> Result<(), BoxError> {
            Ok(())
        }

        async fn query(&self, text: &str, _params: &[String]) -> Result<String, BoxError> {
            Ok(text.to_string())
        }

        async fn close(&self) -> Result<(), BoxError> {
            Ok(())
        }

        fn abort(&self) {}

        fn on_error(&self, _handler: ErrorHandler) {}
    }

    fn pool(max_size: usize) -> Pool<EchoClient> {
        Pool::new(|| EchoClient, PoolConfiguration::new().with_max_size(max_size)).unwrap()
    }

    #[tokio::test]
    async fn test_pool_basic() {
        let pool = pool(2);

        {
            let client = pool.acquire().await.unwrap();
            assert_eq!(pool.total_count(), 1);
            assert_eq!(pool.idle_count(), 0);
            client.release(None).unwrap();
        }

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.total_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_returns_client() {
        let pool = pool(1);

        {
            let _client = pool.acquire().await.unwrap();
        }

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.get_metrics().total_released, 1);
    }

    #[tokio::test]
    async fn test_acquire_with_splits_release() {
        let pool = pool(1);
        let (tx, rx) = tokio::sync::oneshot::channel();

        pool.acquire_with(move |result| {
            let _ = tx.send(result);
        });

        let (client, release) = rx.await.unwrap().unwrap();
        assert_eq!(client.query("ping", &[]).await.unwrap(), "ping");
        release.release(None).unwrap();
        assert!(matches!(release.release(None), Err(PoolError::DoubleRelease)));
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_max_size_rejected() {
        let result = Pool::new(|| EchoClient, PoolConfiguration::new().with_max_size(0));
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }
}
