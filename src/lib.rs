//! # esox_connpool
//!
//! Bounded connection pool for stateful network clients such as database
//! driver connections.
//!
//! ## Features
//!
//! - Caps the number of open connections and opens new ones lazily
//! - Queues callers when the pool is saturated and serves them in order
//! - Reuses the most recently released connection first
//! - Per-connection idle timeout and connect deadline
//! - Single-use release capability that rejects double returns
//! - Future or completion-handler style for every operation
//! - Lifecycle events, metrics, Prometheus export and health status
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_connpool::{BoxError, Client, ErrorHandler, Pool, PoolConfiguration};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Client for Echo {
//!     type Param = String;
//!     type Output = String;
//!
//!     async fn connect(&self) -> Result<(), BoxError> { Ok(()) }
//!     async fn query(&self, text: &str, _: &[String]) -> Result<String, BoxError> {
//!         Ok(text.to_string())
//!     }
//!     async fn close(&self) -> Result<(), BoxError> { Ok(()) }
//!     fn abort(&self) {}
//!     fn on_error(&self, _handler: ErrorHandler) {}
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), esox_connpool::PoolError> {
//! let pool = Pool::new(|| Echo, PoolConfiguration::new().with_max_size(4))?;
//!
//! let client = pool.acquire().await?;
//! println!("{}", client.query("SELECT 1", &[]).await.unwrap());
//! client.release(None)?;
//!
//! assert_eq!(pool.idle_count(), 1);
//! pool.end().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod completion;
mod config;
mod errors;
mod events;
mod health;
mod idle;
mod lifecycle;
mod metrics;
mod pool;

pub use client::{Client, ClientId, ErrorHandler};
pub use completion::Pending;
pub use config::PoolConfiguration;
pub use errors::{BoxError, ClientError, PoolError, PoolResult};
pub use events::{PoolEvent, RemoveReason};
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{Pool, PooledClient, Release};
