//! Health monitoring for connection pools

#[cfg(feature = "metrics")]
use serde::Serialize;

/// Health status of a connection pool
///
/// A pool is unhealthy when callers are queued behind a full pool or when
/// utilization is above 90%.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "metrics", derive(Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// `total / max_size` (0.0 to 1.0)
    pub utilization: f64,

    /// Callers waiting for a client
    pub waiting_clients: usize,

    /// Idle clients
    pub idle_clients: usize,

    /// Clients tracked by the pool
    pub total_clients: usize,

    /// Maximum pool size
    pub max_size: usize,

    /// Whether `end` has been called
    pub is_ending: bool,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(waiting: usize, idle: usize, total: usize, max_size: usize, is_ending: bool) -> Self {
        let utilization = if max_size > 0 {
            total as f64 / max_size as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if is_ending {
            warnings.push("Pool is shutting down".to_string());
            is_healthy = false;
        }

        if total >= max_size && waiting > 0 {
            warnings.push(format!("Pool saturated: {waiting} callers waiting"));
            is_healthy = false;
        } else if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if idle == 0 && total > 0 {
            warnings.push("No idle clients".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            waiting_clients: waiting,
            idle_clients: idle,
            total_clients: total,
            max_size,
            is_ending,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
