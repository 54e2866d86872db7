//! The composed gateway.
//!
//! A fetch goes through the layers in a fixed order:
//!
//! ```text
//! fetch(fingerprint, op)
//!   └─ Deduplicator        one run per fingerprint, shared by all callers
//!        └─ ResponseCache  fresh entry → return it
//!             └─ PoolManager  acquire a client handle
//!                  └─ op(&mut client)  store success in the cache, release handle
//! ```
//!
//! The throttle guard sits beside this path for call sites that emit events.

use crate::config::SluiceConfig;
use crate::error::GatewayError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use sluice_cache::{CacheStats, ResponseCache};
use sluice_coalesce::{DedupStats, Deduplicator};
use sluice_pool::{ClientFactory, PoolManager, PoolStats};
use sluice_throttle::{ThrottleGuard, ThrottleStats};
use sluice_types::{BackgroundTask, BoxError, Fingerprint, SharedClock, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Statistics for every gateway component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GatewayStats {
    pub pool: PoolStats,
    pub cache: CacheStats,
    pub dedup: DedupStats,
    pub throttle: ThrottleStats,
}

/// Pooled, cached and deduplicated access to a backend.
///
/// `C` is the backend client handle, `V` the response payload.
pub struct Gateway<C: Send + 'static, V> {
    pool: Arc<PoolManager<C>>,
    cache: Arc<ResponseCache<V>>,
    dedup: Deduplicator<Fingerprint, Result<V, GatewayError>>,
    throttle: Arc<ThrottleGuard>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl<C, V> Gateway<C, V>
where
    C: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts every component and its background task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start<F>(factory: F, config: &SluiceConfig) -> Result<Self, GatewayError>
    where
        F: ClientFactory<Client = C>,
    {
        Self::start_with_clock(Arc::new(factory), config, SystemClock::shared()).await
    }

    /// Starts the gateway with an explicit clock.
    pub async fn start_with_clock(
        factory: Arc<dyn ClientFactory<Client = C>>,
        config: &SluiceConfig,
        clock: SharedClock,
    ) -> Result<Self, GatewayError> {
        let cache = ResponseCache::with_clock(config.cache_config(), Arc::clone(&clock))
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        let throttle = ThrottleGuard::with_clock(config.throttle_config(), Arc::clone(&clock))
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        let pool = PoolManager::start_with_clock(factory, config.pool_config(), clock).await?;

        let cache = Arc::new(cache);
        let throttle = Arc::new(throttle);
        let tasks = vec![cache.spawn_sweeper(), throttle.spawn_cleanup()];

        tracing::info!(
            pool_max = config.pool.max_size,
            cache_max_entries = config.cache.max_entries,
            throttle_max_records = config.throttle.max_records,
            "Gateway started"
        );

        Ok(Self {
            pool: Arc::new(pool),
            cache,
            dedup: Deduplicator::new(),
            throttle,
            tasks: Mutex::new(tasks),
        })
    }

    /// Fetches the response for `fingerprint`, running `op` against a pooled
    /// client on a cache miss.
    ///
    /// `op` borrows the checked-out client for the duration of its future,
    /// and the handle goes back to the pool once that future completes.
    /// Concurrent fetches of the same fingerprint share one run and one
    /// result. Successful responses are cached under the key's default
    /// maximum age; failures are returned to every sharing caller and never
    /// cached.
    pub async fn fetch<F>(&self, fingerprint: &Fingerprint, op: F) -> Result<V, GatewayError>
    where
        F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<V, BoxError>> + Send + 'static,
    {
        self.fetch_with_ttl(fingerprint, None, op).await
    }

    /// Like [`fetch`](Self::fetch), caching a success for `ttl` instead of
    /// the default. A zero `ttl` disables caching of the result.
    pub async fn fetch_with_ttl<F>(
        &self,
        fingerprint: &Fingerprint,
        ttl: Option<Duration>,
        op: F,
    ) -> Result<V, GatewayError>
    where
        F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<V, BoxError>> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let cache = Arc::clone(&self.cache);
        let key = fingerprint.clone();

        self.dedup
            .run(fingerprint.clone(), move || load(pool, cache, key, ttl, op))
            .await
    }

    /// Removes cached responses matching `pattern` (exact key or `*` glob).
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Returns true if an event with `key` should be emitted now.
    pub fn should_emit(&self, key: impl AsRef<str>, cooldown: Duration) -> bool {
        self.throttle.should_emit(key, cooldown)
    }

    /// Returns the client pool.
    pub fn pool(&self) -> &PoolManager<C> {
        &self.pool
    }

    /// Returns the response cache.
    pub fn cache(&self) -> &ResponseCache<V> {
        &self.cache
    }

    /// Returns the throttle guard.
    pub fn throttle(&self) -> &ThrottleGuard {
        &self.throttle
    }

    /// Returns statistics for every component.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            pool: self.pool.stats(),
            cache: self.cache.stats(),
            dedup: self.dedup.stats(),
            throttle: self.throttle.stats(),
        }
    }

    /// Stops background tasks and shuts the pool down. Later calls do
    /// nothing.
    pub async fn shutdown(&self) {
        if self.pool.is_closed() {
            return;
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.shutdown().await;
        }
        self.pool.shutdown().await;
        tracing::info!("Gateway shut down");
    }
}

/// The body of one deduplicated fetch.
async fn load<C, V, F>(
    pool: Arc<PoolManager<C>>,
    cache: Arc<ResponseCache<V>>,
    key: Fingerprint,
    ttl: Option<Duration>,
    op: F,
) -> Result<V, GatewayError>
where
    C: Send + 'static,
    V: Clone + Send + 'static,
    F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<V, BoxError>>,
{
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let mut handle = pool.acquire().await?;
    let result = op(handle.client_mut()).await;

    if let Err(e) = pool.release(handle) {
        tracing::error!(key = %key, error = %e, "Failed to release client handle");
    }

    match result {
        Ok(value) => {
            cache.set(&key, value.clone(), ttl);
            Ok(value)
        }
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "Backend operation failed");
            Err(GatewayError::Operation(Arc::from(e)))
        }
    }
}
