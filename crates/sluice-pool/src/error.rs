//! Pool error types.

use crate::HandleId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// No handle became available before the deadline.
    #[error("timed out after {waited:?} waiting for a client handle")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The client factory could not produce a new handle.
    #[error("failed to create client handle: {0}")]
    Creation(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The handle is not checked out from this pool.
    #[error("handle {id} is not checked out from this pool")]
    InvalidRelease {
        /// The offending handle.
        id: HandleId,
    },

    /// The pool has been shut down.
    #[error("pool is closed")]
    Closed,

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Returns true if the caller may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Creation(_))
    }
}
