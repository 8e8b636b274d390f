//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "metrics")]
use serde::Serialize;

#[cfg(feature = "metrics")]
use crate::errors::{PoolError, PoolResult};

/// Metrics data for a pool
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "metrics", derive(Serialize))]
pub struct PoolMetrics {
    /// Clients that finished connecting
    pub total_connected: usize,

    /// Clients handed to callers
    pub total_acquired: usize,

    /// Clients returned through their release capability
    pub total_released: usize,

    /// Clients removed from the pool
    pub total_removed: usize,

    /// Connect attempts that failed
    pub connect_failures: usize,

    /// Connect attempts that hit the deadline
    pub connect_timeouts: usize,

    /// Runtime errors raised by connected clients
    pub client_errors: usize,

    /// Callers waiting for a client
    pub waiting: usize,

    /// Clients sitting idle
    pub idle: usize,

    /// Clients tracked by the pool, including ones still connecting
    pub total: usize,

    /// Maximum pool size
    pub max_size: usize,

    /// `total / max_size` (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_connected".to_string(), self.total_connected.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_removed".to_string(), self.total_removed.to_string());
        metrics.insert("connect_failures".to_string(), self.connect_failures.to_string());
        metrics.insert("connect_timeouts".to_string(), self.connect_timeouts.to_string());
        metrics.insert("client_errors".to_string(), self.client_errors.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("total".to_string(), self.total.to_string());
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Render a metrics snapshot in the Prometheus text exposition format.
    ///
    /// Every series carries a `pool` label plus any extra `tags`.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let registry = Registry::new_custom(Some("connpool".to_string()), Some(labels))
            .map_err(|e| PoolError::Metrics(e.to_string()))?;

        let gauges = [
            ("clients_waiting", "Callers waiting for a client", metrics.waiting),
            ("clients_idle", "Clients sitting idle", metrics.idle),
            ("clients_total", "Clients tracked by the pool", metrics.total),
            ("clients_max", "Maximum pool size", metrics.max_size),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(Opts::new(name, help))
                .map_err(|e| PoolError::Metrics(e.to_string()))?;
            gauge.set(value as i64);
            registry
                .register(Box::new(gauge))
                .map_err(|e| PoolError::Metrics(e.to_string()))?;
        }

        let counters = [
            ("connected_total", "Clients that finished connecting", metrics.total_connected),
            ("acquired_total", "Clients handed to callers", metrics.total_acquired),
            ("released_total", "Clients released by callers", metrics.total_released),
            ("removed_total", "Clients removed from the pool", metrics.total_removed),
            ("connect_failures_total", "Failed connect attempts", metrics.connect_failures),
            ("connect_timeouts_total", "Connect attempts that hit the deadline", metrics.connect_timeouts),
            ("client_errors_total", "Runtime errors raised by clients", metrics.client_errors),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(Opts::new(name, help))
                .map_err(|e| PoolError::Metrics(e.to_string()))?;
            counter.inc_by(value as u64);
            registry
                .register(Box::new(counter))
                .map_err(|e| PoolError::Metrics(e.to_string()))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(|e| PoolError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| PoolError::Metrics(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_connected: AtomicUsize,
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_removed: AtomicUsize,
    pub connect_failures: AtomicUsize,
    pub connect_timeouts: AtomicUsize,
    pub client_errors: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, waiting: usize, idle: usize, total: usize, max_size: usize) -> PoolMetrics {
        let utilization = if max_size > 0 {
            total as f64 / max_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_connected: self.total_connected.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connect_timeouts: self.connect_timeouts.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            waiting,
            idle,
            total,
            max_size,
            utilization,
        }
    }
}
