//! Pool configuration.

use crate::PoolError;
use std::time::Duration;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of handles kept alive even when idle.
    pub min_size: usize,
    /// Maximum number of live handles.
    pub max_size: usize,
    /// Default time `acquire` waits for a handle.
    pub acquire_timeout: Duration,
    /// Idle time after which a handle may be reaped.
    pub idle_timeout: Duration,
    /// Interval between reaper passes.
    pub reap_interval: Duration,
    /// Maximum lifetime of a handle. `None` keeps handles forever.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
            max_lifetime: Some(Duration::from_secs(3600)),
        }
    }
}

impl PoolConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfig("max_size must be at least 1".into()));
        }

        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }

        if self.reap_interval.is_zero() {
            return Err(PoolError::InvalidConfig("reap_interval must be non-zero".into()));
        }

        if self.max_lifetime.is_some_and(|lifetime| lifetime.is_zero()) {
            return Err(PoolError::InvalidConfig("max_lifetime must be non-zero".into()));
        }

        Ok(())
    }
}
