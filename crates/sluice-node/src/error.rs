//! Gateway and configuration errors.

use sluice_pool::PoolError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`Gateway::fetch`](crate::Gateway::fetch).
///
/// Cloneable so one failure can be handed to every coalesced caller.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No backend handle could be obtained.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// The backend operation failed.
    #[error("operation failed: {0}")]
    Operation(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A component rejected its configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayError {
    /// Returns true if the failure came from pool exhaustion.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Pool(PoolError::Timeout { .. }))
    }
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for the configuration schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The configuration is well-formed but not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
