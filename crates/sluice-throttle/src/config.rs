//! Throttle configuration.

use std::time::Duration;
use thiserror::Error;

/// The throttle configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid throttle configuration: {0}")]
pub struct InvalidConfig(pub String);

/// Throttle guard configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    /// Maximum number of records kept.
    pub max_records: usize,
    /// Share of `max_records` kept when trimming under size pressure.
    pub retain_ratio: f64,
    /// Interval between background cleanups.
    pub cleanup_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_records: 100,
            retain_ratio: 0.7,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl ThrottleConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.max_records == 0 {
            return Err(InvalidConfig("max_records must be at least 1".into()));
        }
        if !(self.retain_ratio > 0.0 && self.retain_ratio <= 1.0) {
            return Err(InvalidConfig(format!(
                "retain_ratio must be in (0, 1], got {}",
                self.retain_ratio
            )));
        }
        if self.cleanup_interval.is_zero() {
            return Err(InvalidConfig("cleanup_interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Number of records kept after trimming.
    pub fn retained_records(&self) -> usize {
        let retained = (self.max_records as f64 * self.retain_ratio).ceil() as usize;
        retained.clamp(1, self.max_records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ThrottleConfig::default();
        assert_eq!(config.max_records, 100);
        assert_eq!(config.retained_records(), 70);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        for ratio in [0.0, -0.5, 1.5, f64::NAN] {
            let config = ThrottleConfig {
                retain_ratio: ratio,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "ratio {ratio} accepted");
        }
    }

    #[test]
    fn test_retained_records_at_least_one() {
        let config = ThrottleConfig {
            max_records: 1,
            retain_ratio: 0.1,
            ..Default::default()
        };
        assert_eq!(config.retained_records(), 1);
    }
}
