//! Pool lifecycle notifications
//!
//! Every notification carries the client it concerns. Delivery goes through a
//! `tokio::sync::broadcast` channel: emitting never blocks the pool, and a
//! subscriber that falls behind sees `RecvError::Lagged`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::client::ClientId;
use crate::errors::ClientError;

/// Why a client left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// Released with an error hint
    ReleasedWithError,
    /// Sat idle longer than the idle timeout
    IdleTimeout,
    /// Failed after connecting
    RuntimeError,
    /// Closed by `end`
    Shutdown,
}

/// Observable pool event
pub enum PoolEvent<C> {
    /// A new client finished connecting
    Connect { id: ClientId, client: Arc<C> },
    /// A client was handed to a caller
    Acquire { id: ClientId, client: Arc<C> },
    /// A client was removed from the pool and is being closed
    Remove {
        id: ClientId,
        client: Arc<C>,
        reason: RemoveReason,
    },
    /// An acquired client failed. By the time this is received the client
    /// has been removed from the pool and is being closed; do not use it
    /// further.
    Error {
        id: ClientId,
        client: Arc<C>,
        error: ClientError,
    },
}

impl<C> PoolEvent<C> {
    pub fn client_id(&self) -> ClientId {
        match self {
            PoolEvent::Connect { id, .. }
            | PoolEvent::Acquire { id, .. }
            | PoolEvent::Remove { id, .. }
            | PoolEvent::Error { id, .. } => *id,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        match self {
            PoolEvent::Connect { client, .. }
            | PoolEvent::Acquire { client, .. }
            | PoolEvent::Remove { client, .. }
            | PoolEvent::Error { client, .. } => client,
        }
    }
}

impl<C> Clone for PoolEvent<C> {
    fn clone(&self) -> Self {
        match self {
            PoolEvent::Connect { id, client } => PoolEvent::Connect {
                id: *id,
                client: Arc::clone(client),
            },
            PoolEvent::Acquire { id, client } => PoolEvent::Acquire {
                id: *id,
                client: Arc::clone(client),
            },
            PoolEvent::Remove { id, client, reason } => PoolEvent::Remove {
                id: *id,
                client: Arc::clone(client),
                reason: *reason,
            },
            PoolEvent::Error { id, client, error } => PoolEvent::Error {
                id: *id,
                client: Arc::clone(client),
                error: Arc::clone(error),
            },
        }
    }
}

impl<C> fmt::Debug for PoolEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::Connect { id, .. } => f.debug_struct("Connect").field("id", id).finish(),
            PoolEvent::Acquire { id, .. } => f.debug_struct("Acquire").field("id", id).finish(),
            PoolEvent::Remove { id, reason, .. } => f
                .debug_struct("Remove")
                .field("id", id)
                .field("reason", reason)
                .finish(),
            PoolEvent::Error { id, error, .. } => f
                .debug_struct("Error")
                .field("id", id)
                .field("error", &error.to_string())
                .finish(),
        }
    }
}

pub(crate) struct EventBus<C> {
    sender: broadcast::Sender<PoolEvent<C>>,
}

impl<C> EventBus<C> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: PoolEvent<C>) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent<C>> {
        self.sender.subscribe()
    }
}
