//! Pool configuration.

use crate::error::{Error, Result};
use std::time::Duration;

/// Built-in endpoint selection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Available endpoint with the fewest active sessions
    #[default]
    LeastLoaded,
    /// Next available endpoint in registration order
    RoundRobin,
}

/// Options for ConnectionPool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connect and per-RPC timeout; zero means no timeout
    pub timeout: Duration,
    /// Idle connections older than this are closed; zero means never
    pub idle_time: Duration,
    /// Maximum number of connections across all endpoints
    pub max_conn_pool_size: usize,
    /// Number of connections opened when the pool is initialized
    pub min_conn_pool_size: usize,
    /// Acquisition attempts per session request
    pub max_retry_times: u32,
    /// Period of background endpoint probing and idle eviction; zero disables it
    pub health_check_interval: Duration,
    /// Endpoint selection strategy for new connections
    pub selection: SelectionStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            idle_time: Duration::ZERO,
            max_conn_pool_size: 10,
            min_conn_pool_size: 0,
            max_retry_times: 3,
            health_check_interval: Duration::ZERO,
            selection: SelectionStrategy::default(),
        }
    }
}

impl PoolConfig {
    /// Check the sizing and retry settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_conn_pool_size == 0 {
            return Err(Error::Initialization(
                "max_conn_pool_size must be greater than 0".to_string(),
            ));
        }
        if self.min_conn_pool_size > self.max_conn_pool_size {
            return Err(Error::Initialization(format!(
                "min_conn_pool_size ({}) cannot exceed max_conn_pool_size ({})",
                self.min_conn_pool_size, self.max_conn_pool_size
            )));
        }
        if self.max_retry_times == 0 {
            return Err(Error::Initialization(
                "max_retry_times must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The timeout, or `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// The idle time-to-live, or `None` when connections never expire.
    pub fn idle_time(&self) -> Option<Duration> {
        (!self.idle_time.is_zero()).then_some(self.idle_time)
    }

    /// The maintenance period, or `None` when disabled.
    pub fn health_check_interval(&self) -> Option<Duration> {
        (!self.health_check_interval.is_zero()).then_some(self.health_check_interval)
    }

    // Builder-style setters

    /// Set the connect and per-RPC timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the idle time-to-live.
    pub fn with_idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = idle_time;
        self
    }

    /// Set the minimum and maximum pool sizes.
    pub fn with_pool_size(mut self, min: usize, max: usize) -> Self {
        self.min_conn_pool_size = min;
        self.max_conn_pool_size = max;
        self
    }

    /// Set the acquisition attempts per session request.
    pub fn with_max_retry_times(mut self, times: u32) -> Self {
        self.max_retry_times = times;
        self
    }

    /// Set the background maintenance period.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the endpoint selection strategy.
    pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
        self.selection = selection;
        self
    }
}
