//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_connpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_size(20)
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_idle_timeout(Duration::from_secs(30));
///
/// assert_eq!(config.max_size, 20);
/// assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Maximum number of clients the pool keeps open at once
    pub max_size: usize,

    /// Deadline for establishing a new connection
    pub connect_timeout: Option<Duration>,

    /// How long a released client may sit idle before it is closed
    pub idle_timeout: Option<Duration>,

    /// Extra sink for the pool's lifecycle log lines
    pub logger: Option<fn(&str)>,

    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_size: 10,
            connect_timeout: None,
            idle_timeout: None,
            logger: None,
            event_capacity: 64,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_size(1);
    /// assert_eq!(config.max_size, 1);
    /// ```
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the connect deadline. A zero duration disables it.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Set the idle timeout. A zero duration disables it.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Forward lifecycle log lines to `logger` as well as `tracing`
    pub fn with_logger(mut self, logger: fn(&str)) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check the configuration for values the pool cannot run with
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(PoolError::Configuration(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfiguration::default();
        assert_eq!(config.max_size, 10);
        assert!(config.connect_timeout.is_none());
        assert!(config.idle_timeout.is_none());
        assert!(config.logger.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeouts_disable() {
        let config = PoolConfiguration::new()
            .with_connect_timeout(Duration::from_millis(100))
            .with_connect_timeout(Duration::ZERO)
            .with_idle_timeout(Duration::ZERO);

        assert!(config.connect_timeout.is_none());
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_zero_max_size_rejected() {
        let config = PoolConfiguration::new().with_max_size(0);
        assert!(matches!(config.validate(), Err(PoolError::Configuration(_))));
    }
}
