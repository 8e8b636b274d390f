//! Concurrency, events and shutdown examples

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use esox_connpool::{BoxError, Client, ErrorHandler, Pool, PoolConfiguration, PoolEvent};
use parking_lot::Mutex;
use tokio::time::sleep;

/// Connection with a configurable handshake delay. Errors can be injected
/// through the handler the pool installs.
#[derive(Default)]
struct SlowConnection {
    handshake: Duration,
    handler: Mutex<Option<ErrorHandler>>,
}

impl SlowConnection {
    fn fail(&self, message: &str) {
        if let Some(handler) = self.handler.lock().as_ref() {
            handler(BoxError::from(message));
        }
    }
}

#[async_trait]
impl Client for SlowConnection {
    type Param = String;
    type Output = usize;

    async fn connect(&self) -> Result<(), BoxError> {
        sleep(self.handshake).await;
        Ok(())
    }

    async fn query(&self, text: &str, _params: &[String]) -> Result<usize, BoxError> {
        sleep(Duration::from_millis(20)).await;
        Ok(text.len())
    }

    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn abort(&self) {}

    fn on_error(&self, handler: ErrorHandler) {
        *self.handler.lock() = Some(handler);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Esox Connection Pool - Async Examples ===\n");

    // Example 1: Concurrent access
    concurrent_access().await?;

    // Example 2: Connect deadline
    connect_timeout().await?;

    // Example 3: Lifecycle events
    lifecycle_events().await?;

    // Example 4: Completion handlers
    completion_handlers().await;

    Ok(())
}

async fn concurrent_access() -> Result<(), Box<dyn std::error::Error>> {
    println!("1. Concurrent Access:");
    let pool = Pool::new(
        SlowConnection::default,
        PoolConfiguration::new().with_max_size(3),
    )?;

    let mut handles = vec![];
    for i in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let text = format!("SELECT {i}");
            match pool.query(&text, &[]).await {
                Ok(len) => println!("   Task {i} read {len} bytes"),
                Err(e) => println!("   Task {i} failed: {e}"),
            }
        }));
    }
    for handle in handles {
        handle.await?;
    }

    println!("   Connections opened: {}", pool.total_count());
    pool.end().await?;
    println!();
    Ok(())
}

async fn connect_timeout() -> Result<(), Box<dyn std::error::Error>> {
    println!("2. Connect Deadline:");
    let pool = Pool::new(
        || SlowConnection {
            handshake: Duration::from_millis(500),
            ..SlowConnection::default()
        },
        PoolConfiguration::new().with_connect_timeout(Duration::from_millis(50)),
    )?;

    match pool.acquire().await {
        Ok(_) => println!("   Connected"),
        Err(e) => println!("   Error: {e}"),
    }

    pool.end().await?;
    println!();
    Ok(())
}

async fn lifecycle_events() -> Result<(), Box<dyn std::error::Error>> {
    println!("3. Lifecycle Events:");
    let pool = Pool::new(
        SlowConnection::default,
        PoolConfiguration::new().with_idle_timeout(Duration::from_millis(100)),
    )?;
    let mut events = pool.subscribe();

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PoolEvent::Connect { id, .. } => println!("   {id} connected"),
                PoolEvent::Acquire { id, .. } => println!("   {id} acquired"),
                PoolEvent::Remove { id, reason, .. } => println!("   {id} removed: {reason:?}"),
                PoolEvent::Error { id, error, .. } => println!("   {id} failed: {error}"),
            }
        }
    });

    let broken = pool.acquire().await?;
    broken.fail("connection reset by peer");
    broken.release(None)?;

    pool.acquire().await?.release(None)?;
    sleep(Duration::from_millis(150)).await;

    pool.end().await?;
    drop(pool);
    printer.await?;
    println!();
    Ok(())
}

async fn completion_handlers() {
    println!("4. Completion Handlers:");
    let pool = match Pool::new(SlowConnection::default, PoolConfiguration::default()) {
        Ok(pool) => pool,
        Err(e) => {
            println!("   Error: {e}");
            return;
        }
    };

    let done = Arc::new(tokio::sync::Notify::new());
    let signal = Arc::clone(&done);
    pool.query_with("SELECT now()", Vec::new(), move |result| {
        println!("   Handler got {result:?}");
        signal.notify_one();
    });
    done.notified().await;

    let signal = Arc::clone(&done);
    pool.end_with(move |result| {
        println!("   Pool ended: {}", result.is_ok());
        signal.notify_one();
    });
    done.notified().await;
}
