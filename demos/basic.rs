//! Basic usage examples for the connection pool

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use esox_connpool::{BoxError, Client, ErrorHandler, Pool, PoolConfiguration};

static OPENED: AtomicUsize = AtomicUsize::new(0);

/// Pretend connection that answers every query with its own text
struct MemoryConnection {
    number: usize,
}

impl MemoryConnection {
    fn open() -> Self {
        Self {
            number: OPENED.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

#[async_trait]
impl Client for MemoryConnection {
    type Param = i64;
    type Output = String;

    async fn connect(&self) -> Result<(), BoxError> {
        println!("   Connection #{} opened", self.number);
        Ok(())
    }

    async fn query(&self, text: &str, params: &[i64]) -> Result<String, BoxError> {
        Ok(format!("#{} ran {text} with {params:?}", self.number))
    }

    async fn close(&self) -> Result<(), BoxError> {
        println!("   Connection #{} closed", self.number);
        Ok(())
    }

    fn abort(&self) {}

    fn on_error(&self, _handler: ErrorHandler) {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Esox Connection Pool - Basic Examples ===\n");

    // Example 1: Acquire and release
    simple_pool().await?;

    // Example 2: Waiting for a busy pool
    queued_acquire().await?;

    // Example 3: One-shot queries
    pooled_queries().await?;

    // Example 4: Metrics and health
    metrics_and_health().await?;

    Ok(())
}

async fn simple_pool() -> Result<(), Box<dyn std::error::Error>> {
    println!("1. Simple Pool:");
    let pool = Pool::new(MemoryConnection::open, PoolConfiguration::default())?;

    {
        let client = pool.acquire().await?;
        let row = client.query("SELECT 1", &[]).await.map_err(|e| e.to_string())?;
        println!("   {row}");
        // Client automatically returned when dropped
    }

    println!("   Idle after return: {}", pool.idle_count());
    pool.end().await?;
    println!();
    Ok(())
}

async fn queued_acquire() -> Result<(), Box<dyn std::error::Error>> {
    println!("2. Queued Acquire:");
    let pool = Pool::new(
        MemoryConnection::open,
        PoolConfiguration::new().with_max_size(1),
    )?;

    let first = pool.acquire().await?;
    let second = pool.acquire();
    println!("   Waiting callers: {}", pool.waiting_count());

    first.release(None)?;
    let second = second.await?;
    println!("   Second caller got {}", second.id());
    second.release(None)?;

    pool.end().await?;
    println!();
    Ok(())
}

async fn pooled_queries() -> Result<(), Box<dyn std::error::Error>> {
    println!("3. Pooled Queries:");
    let pool = Pool::new(
        MemoryConnection::open,
        PoolConfiguration::new().with_max_size(2),
    )?;

    for id in 1..=3 {
        let row = pool.query("SELECT * FROM users WHERE id = $1", &[id]).await?;
        println!("   {row}");
    }
    println!("   Connections opened: {}", pool.total_count());

    pool.end().await?;
    println!();
    Ok(())
}

async fn metrics_and_health() -> Result<(), Box<dyn std::error::Error>> {
    println!("4. Metrics and Health:");
    let pool = Pool::new(MemoryConnection::open, PoolConfiguration::default())?;

    {
        let _a = pool.acquire().await?;
        let _b = pool.acquire().await?;

        let health = pool.get_health_status();
        println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
        println!("   Utilization: {:.1}%", health.utilization * 100.0);
        println!("   Total: {}, Idle: {}", health.total_clients, health.idle_clients);
    }

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {key}: {value}");
    }

    pool.end().await?;
    Ok(())
}
