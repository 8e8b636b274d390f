//! Completion bridge: every asynchronous pool operation settles exactly once,
//! either through a future or through a completion handler.
//!
//! The core operations hand out futures. [`Completion`] is the settling half
//! held by the pool; it is consumed by [`Completion::settle`], so a waiter can
//! never be resolved twice. Handler-style callers go through [`complete_with`],
//! which drives the same future and calls the handler with its outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::errors::{PoolError, PoolResult};

/// Settling half of a pending operation
pub(crate) struct Completion<T> {
    sender: oneshot::Sender<PoolResult<T>>,
}

/// Create a linked completion and the future it settles
pub(crate) fn completion<T>() -> (Completion<T>, Pending<T>) {
    let (sender, receiver) = oneshot::channel();
    (Completion { sender }, Pending { receiver })
}

impl<T> Completion<T> {
    /// Settle the operation. If the caller dropped its future the result is
    /// handed back so the caller of `settle` can dispose of it.
    pub fn settle(self, result: PoolResult<T>) -> Result<(), PoolResult<T>> {
        self.sender.send(result)
    }

    /// Whether the receiving side has gone away
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Future returned by [`Pool::acquire`](crate::Pool::acquire).
///
/// The pool registers the request when `acquire` is called, not when this
/// future is first polled. Resolves with [`PoolError::PoolClosed`] if the pool
/// is dropped before the request is served.
#[must_use = "dropping a pending acquire abandons the request"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<PoolResult<T>>,
}

impl<T> Pending<T> {
    /// An already-settled operation
    pub(crate) fn ready(result: PoolResult<T>) -> Self {
        let (completion, pending) = completion();
        // The receiver is alive, so this cannot hand the result back.
        let _ = completion.settle(result);
        pending
    }
}

impl<T> Future for Pending<T> {
    type Output = PoolResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(PoolError::PoolClosed)))
    }
}

/// Drive `future` to completion and pass its outcome to `handler`.
pub(crate) fn complete_with<T, Fut, F>(future: Fut, handler: F)
where
    T: Send + 'static,
    Fut: Future<Output = PoolResult<T>> + Send + 'static,
    F: FnOnce(PoolResult<T>) + Send + 'static,
{
    tokio::spawn(async move {
        handler(future.await);
    });
}
