//! The capability set the pool needs from a network client

use std::fmt;

use async_trait::async_trait;

use crate::errors::BoxError;

/// Listener a client calls when it fails after connecting.
pub type ErrorHandler = Box<dyn Fn(BoxError) + Send + Sync>;

/// A stateful connection the pool can open, use and close.
///
/// The pool never looks at the wire protocol. It calls [`connect`](Client::connect)
/// once per client, hands the client out for [`query`](Client::query) calls,
/// and [`close`](Client::close)s it when the client is removed. If a connect
/// deadline expires the pool calls [`abort`](Client::abort), after which the
/// pending `connect` is expected to finish, usually with an error. A connect
/// that has not finished one more deadline after the abort is dropped and
/// the client is closed.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Query parameter type
    type Param: Send + Sync;

    /// Query result type
    type Output: Send + 'static;

    async fn connect(&self) -> Result<(), BoxError>;

    async fn query(&self, text: &str, params: &[Self::Param]) -> Result<Self::Output, BoxError>;

    async fn close(&self) -> Result<(), BoxError>;

    /// Forcibly tear down the underlying transport
    fn abort(&self);

    /// Register the listener for errors raised after a successful connect.
    /// The pool registers exactly one listener per client.
    fn on_error(&self, handler: ErrorHandler);
}

/// Pool-unique identifier of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) usize);

impl ClientId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}
