//! Error types for the connection pool

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type reported by a [`Client`](crate::Client) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared client error, cheap to clone into events and results.
pub type ClientError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Cannot use a pool after calling end on the pool")]
    PoolClosed,

    #[error("Called end on pool more than once")]
    AlreadyEnded,

    #[error("Release called on client which has already been released to the pool")]
    DoubleRelease,

    #[error("Connection terminated due to connection timeout ({0:?})")]
    ConnectTimeout(Duration),

    #[error("Failed to connect client: {0}")]
    Connect(#[source] ClientError),

    #[error("Client failed after connecting: {0}")]
    ClientRuntime(#[source] ClientError),

    #[error("Query failed: {0}")]
    Query(#[source] ClientError),

    #[error("Failed to close client: {0}")]
    Close(#[source] ClientError),

    #[error("Invalid pool configuration: {0}")]
    Configuration(String),

    #[error("Failed to export metrics: {0}")]
    Metrics(String),
}

impl PoolError {
    /// Whether this error came from an expired connect deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::ConnectTimeout(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_differs_from_connect_failure() {
        let timeout = PoolError::ConnectTimeout(Duration::from_millis(50));
        let failure = PoolError::Connect(Arc::from(BoxError::from("refused")));

        assert!(timeout.is_timeout());
        assert!(!failure.is_timeout());
        assert!(timeout.to_string().contains("timeout"));
        assert!(!failure.to_string().contains("timeout"));
    }
}
