//! The response cache.

use crate::{CacheConfig, InvalidConfig, KeyPattern, TtlPolicy};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sluice_types::{BackgroundTask, Fingerprint, SharedClock, SystemClock};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Current number of entries, fresh or not yet swept.
    pub entries: usize,
    /// Reads that returned a fresh entry.
    pub hits: u64,
    /// Reads that found nothing fresh.
    pub misses: u64,
    /// Entries dropped because they outlived their maximum age.
    pub expired: u64,
    /// Entries evicted to stay under the size ceiling.
    pub evictions: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
}

impl CacheStats {
    /// Returns the cache hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired entries removed.
    pub expired: usize,
    /// Fresh entries evicted to get under the ceiling.
    pub evicted: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
    max_age: Duration,
}

impl<V> CacheEntry<V> {
    /// The single freshness predicate shared by reads and sweeps.
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.max_age
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// A TTL and size bounded response cache.
///
/// Entries are kept in store order: overwriting a key makes it the newest,
/// reads do not reorder. Eviction under size pressure removes the
/// oldest-stored entries first.
pub struct ResponseCache<V> {
    config: CacheConfig,
    policy: TtlPolicy,
    clock: SharedClock,
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    counters: CacheCounters,
}

impl<V: Clone + Send + 'static> ResponseCache<V> {
    /// Creates a cache driven by the runtime clock.
    pub fn new(config: CacheConfig) -> Result<Self, InvalidConfig> {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a cache with an explicit clock.
    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Result<Self, InvalidConfig> {
        config.validate()?;
        let policy = config.ttl_policy();
        Ok(Self {
            config,
            policy,
            clock,
            entries: Mutex::new(LruCache::unbounded()),
            counters: CacheCounters::default(),
        })
    }

    /// Returns the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the payload stored under `key` if it is still fresh.
    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let lookup = entries
            .peek(key.as_str())
            .map(|entry| entry.is_fresh(now).then(|| entry.payload.clone()));

        let fresh = match lookup {
            Some(Some(payload)) => Some(payload),
            Some(None) => {
                entries.pop(key.as_str());
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };

        match fresh {
            Some(payload) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `payload` under `key`.
    ///
    /// The maximum age is `ttl_override` if given, otherwise the policy's
    /// value for the key. A maximum age of zero stores nothing. Returns true
    /// if the entry was stored.
    pub fn set(&self, key: &Fingerprint, payload: V, ttl_override: Option<Duration>) -> bool {
        let max_age = ttl_override.unwrap_or_else(|| self.policy.max_age_for(key.as_str()));
        if max_age.is_zero() {
            return false;
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.put(
            key.as_str().to_string(),
            CacheEntry {
                payload,
                stored_at: now,
                max_age,
            },
        );

        if entries.len() > self.config.high_water {
            let report = self.sweep_locked(&mut entries, now);
            if report.expired > 0 || report.evicted > 0 {
                tracing::debug!(
                    expired = report.expired,
                    evicted = report.evicted,
                    entries = entries.len(),
                    "Cache over high-water mark, swept"
                );
            }
        }
        true
    }

    /// Removes every entry selected by `pattern`: an exact key, or a glob
    /// with `*` wildcards. Returns the number of entries removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.invalidate_matching(&KeyPattern::parse(pattern))
    }

    /// Removes every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_matching(&KeyPattern::Prefix(prefix.to_string()))
    }

    /// Removes every entry selected by `pattern`.
    pub fn invalidate_matching(&self, pattern: &KeyPattern) -> usize {
        let mut entries = self.entries.lock();
        let removed = match pattern {
            KeyPattern::Exact(key) => usize::from(entries.pop(key.as_str()).is_some()),
            _ => {
                let keys: Vec<String> = entries
                    .iter()
                    .filter(|(key, _)| pattern.matches(key))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &keys {
                    entries.pop(key.as_str());
                }
                keys.len()
            }
        };
        drop(entries);

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::debug!(?pattern, removed, "Cache invalidated");
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        drop(entries);

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Removes expired entries, then evicts the oldest until the cache is
    /// within its ceiling.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        self.sweep_locked(&mut entries, now)
    }

    fn sweep_locked(&self, entries: &mut LruCache<String, CacheEntry<V>>, now: Instant) -> SweepReport {
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key.as_str());
        }

        let mut evicted = 0;
        while entries.len() > self.config.max_entries {
            if entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }

        self.counters
            .expired
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);

        SweepReport {
            expired: stale.len(),
            evicted,
        }
    }

    /// Returns the number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    /// Spawns the periodic sweeper.
    ///
    /// The sweeper holds a weak reference and stops once the cache is
    /// dropped. Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>) -> BackgroundTask {
        let weak = Arc::downgrade(self);
        BackgroundTask::spawn_periodic("cache-sweeper", self.config.sweep_interval, move || {
            let weak = weak.clone();
            async move {
                let Some(cache) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let report = cache.sweep();
                if report.expired > 0 || report.evicted > 0 {
                    tracing::debug!(
                        expired = report.expired,
                        evicted = report.evicted,
                        "Cache sweep finished"
                    );
                }
                ControlFlow::Continue(())
            }
        })
    }
}

impl<V> std::fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}
