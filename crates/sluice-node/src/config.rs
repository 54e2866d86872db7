//! Node configuration.
//!
//! The configuration file is YAML. Every section and field is optional and
//! falls back to the component defaults. Durations are integer milliseconds.
//!
//! ```yaml
//! pool:
//!   min_size: 2
//!   max_size: 10
//!   acquire_timeout_ms: 30000
//! cache:
//!   default_max_age_ms: 300000
//!   prefix_ttls:
//!     "GET /api/stock": 5000
//! throttle:
//!   max_records: 100
//! logging:
//!   level: info
//!   format: json
//! ```

use crate::error::ConfigError;
use crate::observability::LogFormat;
use serde::{Deserialize, Serialize};
use sluice_cache::CacheConfig;
use sluice_pool::PoolConfig;
use sluice_throttle::ThrottleConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SluiceConfig {
    /// Client pool settings.
    pub pool: PoolSection,
    /// Response cache settings.
    pub cache: CacheSection,
    /// Event throttle settings.
    pub throttle: ThrottleSection,
    /// Logging settings.
    pub logging: LoggingSection,
}

/// Client pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub reap_interval_ms: u64,
    /// `null` keeps handles forever.
    pub max_lifetime_ms: Option<u64>,
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            min_size: defaults.min_size,
            max_size: defaults.max_size,
            acquire_timeout_ms: millis(defaults.acquire_timeout),
            idle_timeout_ms: millis(defaults.idle_timeout),
            reap_interval_ms: millis(defaults.reap_interval),
            max_lifetime_ms: defaults.max_lifetime.map(millis),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    pub default_max_age_ms: u64,
    /// Maximum age per key prefix, longest match wins.
    pub prefix_ttls: BTreeMap<String, u64>,
    pub max_entries: usize,
    pub high_water: usize,
    pub sweep_interval_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            default_max_age_ms: millis(defaults.default_max_age),
            prefix_ttls: BTreeMap::new(),
            max_entries: defaults.max_entries,
            high_water: defaults.high_water,
            sweep_interval_ms: millis(defaults.sweep_interval),
        }
    }
}

/// Event throttle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleSection {
    pub max_records: usize,
    pub retain_ratio: f64,
    pub cleanup_interval_ms: u64,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        let defaults = ThrottleConfig::default();
        Self {
            max_records: defaults.max_records,
            retain_ratio: defaults.retain_ratio,
            cleanup_interval_ms: millis(defaults.cleanup_interval),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// `pretty` or `json`.
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl SluiceConfig {
    /// Loads and validates a YAML configuration file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parses and validates a YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: SluiceConfig = if yaml.trim().is_empty() {
            SluiceConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.cache_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.throttle_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.pool.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pool.acquire_timeout_ms must be non-zero".into(),
            ));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Returns the pool configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_size: self.pool.min_size,
            max_size: self.pool.max_size,
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
            idle_timeout: Duration::from_millis(self.pool.idle_timeout_ms),
            reap_interval: Duration::from_millis(self.pool.reap_interval_ms),
            max_lifetime: self.pool.max_lifetime_ms.map(Duration::from_millis),
        }
    }

    /// Returns the cache configuration.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_max_age: Duration::from_millis(self.cache.default_max_age_ms),
            prefix_ttls: self
                .cache
                .prefix_ttls
                .iter()
                .map(|(prefix, ttl)| (prefix.clone(), Duration::from_millis(*ttl)))
                .collect(),
            max_entries: self.cache.max_entries,
            high_water: self.cache.high_water,
            sweep_interval: Duration::from_millis(self.cache.sweep_interval_ms),
        }
    }

    /// Returns the throttle configuration.
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            max_records: self.throttle.max_records,
            retain_ratio: self.throttle.retain_ratio,
            cleanup_interval: Duration::from_millis(self.throttle.cleanup_interval_ms),
        }
    }
}
