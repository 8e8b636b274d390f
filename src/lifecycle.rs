//! Client lifecycle: connect, release, expiry, runtime errors and removal

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::client::{Client, ClientId, ErrorHandler};
use crate::errors::{BoxError, ClientError, PoolError};
use crate::events::{PoolEvent, RemoveReason};
use crate::idle::IdleEntry;
use crate::metrics::MetricsTracker;
use crate::pool::{PoolInner, PoolState, Waiter};

/// How a connect attempt finished
enum Attempt {
    Connected,
    Failed(BoxError),
    /// The deadline passed. Holds what the aborted connect returned, or
    /// `None` if it had not settled within the grace period either.
    Expired(Duration, Option<Result<(), BoxError>>),
}

impl<C: Client> PoolInner<C> {
    /// Create a client and claim a slot for it. Called with the state lock
    /// held so the size check and the insert cannot be split.
    pub(crate) fn reserve(&self, state: &mut PoolState<C>) -> (ClientId, Arc<C>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let client = Arc::new((self.factory)());
        state.clients.insert(id, Arc::clone(&client));
        state.connecting.insert(id);
        debug!(client = %id, total = state.clients.len(), "reserved slot for new client");
        (id, client)
    }

    pub(crate) fn spawn_connect(self: &Arc<Self>, waiter: Waiter<C>, id: ClientId, client: Arc<C>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            pool.connect(waiter, id, client).await;
        });
    }

    async fn connect(self: Arc<Self>, waiter: Waiter<C>, id: ClientId, client: Arc<C>) {
        self.log(&format!("connecting {id}"));

        let outcome = match self.connect_with_deadline(id, &client).await {
            Attempt::Connected => Ok(()),
            Attempt::Failed(err) => Err(PoolError::Connect(Arc::from(err))),
            Attempt::Expired(deadline, Some(Ok(()))) => {
                warn!(client = %id, "connect succeeded after its deadline, discarding client");
                self.close_detached(id, Arc::clone(&client));
                Err(PoolError::ConnectTimeout(deadline))
            }
            Attempt::Expired(deadline, Some(Err(err))) => {
                debug!(client = %id, error = %err, "aborted connect finished");
                Err(PoolError::ConnectTimeout(deadline))
            }
            Attempt::Expired(deadline, None) => {
                warn!(client = %id, "connect ignored abort, giving up on client");
                self.close_detached(id, Arc::clone(&client));
                Err(PoolError::ConnectTimeout(deadline))
            }
        };

        if let Err(err) = outcome {
            {
                let mut state = self.state.lock();
                state.connecting.remove(&id);
                state.clients.remove(&id);
            }
            MetricsTracker::increment(&self.metrics.connect_failures);
            if err.is_timeout() {
                MetricsTracker::increment(&self.metrics.connect_timeouts);
            }
            warn!(client = %id, error = %err, "client failed to connect");
            self.log(&format!("{id} failed to connect: {err}"));

            self.pulse();
            let _ = waiter.settle(Err(err));
            return;
        }

        let tracked = {
            let mut state = self.state.lock();
            state.connecting.remove(&id);
            let tracked = state.clients.contains_key(&id);
            if tracked {
                self.events.emit(PoolEvent::Connect {
                    id,
                    client: Arc::clone(&client),
                });
            }
            tracked
        };
        if !tracked {
            debug!(client = %id, "pool ended while client was connecting");
            self.close_detached(id, client);
            let _ = waiter.settle(Err(PoolError::PoolClosed));
            return;
        }

        client.on_error(self.error_listener(id));
        MetricsTracker::increment(&self.metrics.total_connected);
        self.log(&format!("{id} connected"));

        let checked_out = self.checkout(id, client);
        self.deliver(waiter, checked_out);
    }

    /// Run the connect, aborting the transport once if the deadline passes.
    /// After the abort the connect gets one more deadline to settle before
    /// it is dropped.
    async fn connect_with_deadline(&self, id: ClientId, client: &C) -> Attempt {
        let Some(deadline) = self.config.connect_timeout else {
            return match client.connect().await {
                Ok(()) => Attempt::Connected,
                Err(err) => Attempt::Failed(err),
            };
        };

        let mut connect = client.connect();
        tokio::select! {
            result = &mut connect => match result {
                Ok(()) => Attempt::Connected,
                Err(err) => Attempt::Failed(err),
            },
            _ = tokio::time::sleep(deadline) => {
                warn!(client = %id, ?deadline, "connect deadline expired, aborting transport");
                client.abort();
                Attempt::Expired(deadline, tokio::time::timeout(deadline, connect).await.ok())
            }
        }
    }

    /// Listener installed on every connected client. Only the first error
    /// purges the client; later ones are logged.
    fn error_listener(self: &Arc<Self>, id: ClientId) -> ErrorHandler {
        let pool = Arc::downgrade(self);
        let fired = AtomicBool::new(false);

        Box::new(move |error: BoxError| {
            if fired.swap(true, Ordering::AcqRel) {
                debug!(client = %id, %error, "additional error on removed client");
                return;
            }
            if let Some(pool) = pool.upgrade() {
                pool.client_failed(id, Arc::from(error));
            }
        })
    }

    fn client_failed(self: &Arc<Self>, id: ClientId, error: ClientError) {
        MetricsTracker::increment(&self.metrics.client_errors);
        let failure = PoolError::ClientRuntime(Arc::clone(&error));
        warn!(client = %id, error = %failure, "removing failed client from the pool");
        self.log(&format!("{id} failed: {failure}"));

        if let Some(client) = self.remove(id, RemoveReason::RuntimeError) {
            self.events.emit(PoolEvent::Error { id, client, error });
        }
        self.pulse();
    }

    /// Take a client back from its caller
    pub(crate) fn release(self: &Arc<Self>, id: ClientId, error: Option<ClientError>) {
        MetricsTracker::increment(&self.metrics.total_released);

        if let Some(error) = error {
            debug!(client = %id, %error, "client released with error");
            self.remove(id, RemoveReason::ReleasedWithError);
            self.pulse();
            return;
        }

        // `end` takes every client out of `clients`, so nothing is tracked
        // once the pool is ending
        let returned = {
            let mut state = self.state.lock();
            match state.clients.get(&id).cloned() {
                Some(client) => {
                    let token = state.idle.next_token();
                    let timer = self
                        .config
                        .idle_timeout
                        .map(|timeout| self.spawn_idle_timer(id, token, timeout));
                    state.idle.push(IdleEntry::new(id, client, token, timer));
                    true
                }
                None => false,
            }
        };

        if returned {
            self.log(&format!("{id} released to idle"));
        } else {
            debug!(client = %id, "released client was already removed");
        }
        self.pulse();
    }

    fn spawn_idle_timer(self: &Arc<Self>, id: ClientId, token: u64, timeout: Duration) -> AbortHandle {
        let pool = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pool) = pool.upgrade() {
                pool.idle_expired(id, token);
            }
        })
        .abort_handle()
    }

    fn idle_expired(self: &Arc<Self>, id: ClientId, token: u64) {
        let expired = self.state.lock().idle.take_expired(id, token);
        if let Some(entry) = expired {
            self.log(&format!("removing {id} after {:?} idle", entry.idle_for()));
            self.remove(id, RemoveReason::IdleTimeout);
            self.pulse();
        }
    }

    /// Drop a client from the pool and close it in the background.
    ///
    /// Returns the client if it was still tracked; removing an id twice is a
    /// no-op the second time.
    pub(crate) fn remove(&self, id: ClientId, reason: RemoveReason) -> Option<Arc<C>> {
        let client = {
            let mut state = self.state.lock();
            state.idle.remove(id);
            state.clients.remove(&id)
        }?;

        MetricsTracker::increment(&self.metrics.total_removed);
        self.events.emit(PoolEvent::Remove {
            id,
            client: Arc::clone(&client),
            reason,
        });
        self.log(&format!("removed {id} ({reason:?})"));

        self.close_detached(id, Arc::clone(&client));
        Some(client)
    }

    fn close_detached(&self, id: ClientId, client: Arc<C>) {
        tokio::spawn(async move {
            if let Err(error) = client.close().await {
                debug!(client = %id, %error, "error while closing client");
            }
        });
    }
}
