//! Cache configuration and TTL policy.

use std::time::Duration;
use thiserror::Error;

/// The cache configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cache configuration: {0}")]
pub struct InvalidConfig(pub String);

/// Response cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum age of an entry whose key matches no prefix rule.
    pub default_max_age: Duration,
    /// Maximum age per key prefix. The longest matching prefix wins.
    pub prefix_ttls: Vec<(String, Duration)>,
    /// Hard ceiling on the number of entries.
    pub max_entries: usize,
    /// Entry count above which a `set` purges expired entries.
    pub high_water: usize,
    /// Interval between background sweeps.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_max_age: Duration::from_secs(300),
            prefix_ttls: Vec::new(),
            max_entries: 100,
            high_water: 80,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.max_entries == 0 {
            return Err(InvalidConfig("max_entries must be at least 1".into()));
        }
        if self.high_water > self.max_entries {
            return Err(InvalidConfig(format!(
                "high_water ({}) exceeds max_entries ({})",
                self.high_water, self.max_entries
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(InvalidConfig("sweep_interval must be non-zero".into()));
        }
        if self.prefix_ttls.iter().any(|(prefix, _)| prefix.is_empty()) {
            return Err(InvalidConfig("TTL prefixes must be non-empty".into()));
        }
        Ok(())
    }

    /// Builds the TTL policy described by this configuration.
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(self.default_max_age, self.prefix_ttls.clone())
    }
}

/// Chooses the maximum age of an entry from its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    default_max_age: Duration,
    /// Sorted longest prefix first.
    rules: Vec<(String, Duration)>,
}

impl TtlPolicy {
    /// Creates a policy from a default and a set of prefix rules.
    pub fn new(default_max_age: Duration, mut rules: Vec<(String, Duration)>) -> Self {
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            default_max_age,
            rules,
        }
    }

    /// Returns the maximum age for `key`.
    pub fn max_age_for(&self, key: &str) -> Duration {
        self.rules
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map_or(self.default_max_age, |(_, ttl)| *ttl)
    }
}
