//! Prometheus metrics collection.
//!
//! Component counters live in the components themselves; this module mirrors
//! a [`GatewayStats`] snapshot into gauges for scraping.

use crate::gateway::GatewayStats;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Single-label set distinguishing the series of one metric.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    /// Series kind (e.g. `idle`, `hit`, `expired`).
    pub kind: String,
}

impl KindLabels {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
        }
    }
}

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// Pool handles by state (total, in_use, idle).
    pub pool_handles: Family<KindLabels, Gauge>,
    /// Callers queued for a handle.
    pub pool_waiters: Gauge,
    pub pool_longest_wait_ms: Gauge,
    /// Pool lifetime events (created, destroyed, timeout, ...).
    pub pool_events: Family<KindLabels, Gauge>,
    /// Cache entries.
    pub cache_entries: Gauge,
    /// Cache lookups by result (hit, miss).
    pub cache_lookups: Family<KindLabels, Gauge>,
    /// Cache removals by reason (expired, evicted, invalidated).
    pub cache_removals: Family<KindLabels, Gauge>,
    /// Cache hit ratio.
    pub cache_hit_ratio: Gauge<f64, AtomicU64>,
    /// Deduplicated runs by outcome (executed, coalesced).
    pub dedup_runs: Family<KindLabels, Gauge>,
    /// Operations in flight.
    pub dedup_in_flight: Gauge,
    /// Throttle records held.
    pub throttle_records: Gauge,
    /// Throttle decisions (emitted, suppressed).
    pub throttle_decisions: Family<KindLabels, Gauge>,
    /// Throttle records evicted.
    pub throttle_evicted: Gauge,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Pool metrics
        let pool_handles = Family::<KindLabels, Gauge>::default();
        registry.register(
            "sluice_pool_handles",
            "Pool handles by state",
            pool_handles.clone(),
        );

        let pool_waiters = Gauge::default();
        registry.register(
            "sluice_pool_waiters",
            "Callers waiting for a pool handle",
            pool_waiters.clone(),
        );

        let pool_longest_wait_ms = Gauge::default();
        registry.register(
            "sluice_pool_longest_wait_ms",
            "Milliseconds the oldest queued caller has waited",
            pool_longest_wait_ms.clone(),
        );

        let pool_events = Family::<KindLabels, Gauge>::default();
        registry.register(
            "sluice_pool_events",
            "Pool lifetime events by kind",
            pool_events.clone(),
        );

        // Cache metrics
        let cache_entries = Gauge::default();
        registry.register(
            "sluice_cache_entries",
            "Entries held by the response cache",
            cache_entries.clone(),
        );

        let cache_lookups = Family::<KindLabels, Gauge>::default();
        registry.register(
            "sluice_cache_lookups",
            "Cache lookups by result",
            cache_lookups.clone(),
        );

        let cache_removals = Family::<KindLabels, Gauge>::default();
        registry.register(
            "sluice_cache_removals",
            "Cache entries removed by reason",
            cache_removals.clone(),
        );

        let cache_hit_ratio = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "sluice_cache_hit_ratio",
            "Share of cache lookups that hit",
            cache_hit_ratio.clone(),
        );

        // Dedup metrics
        let dedup_runs = Family::<KindLabels, Gauge>::default();
        registry.register(
            "sluice_dedup_runs",
            "Deduplicated runs by outcome",
            dedup_runs.clone(),
        );

        let dedup_in_flight = Gauge::default();
        registry.register(
            "sluice_dedup_in_flight",
            "Operations currently in flight",
            dedup_in_flight.clone(),
        );

        // Throttle metrics
        let throttle_records = Gauge::default();
        registry.register(
            "sluice_throttle_records",
            "Throttle records held",
            throttle_records.clone(),
        );

        let throttle_decisions = Family::<KindLabels, Gauge>::default();
        registry.register(
            "sluice_throttle_decisions",
            "Throttle decisions by outcome",
            throttle_decisions.clone(),
        );

        let throttle_evicted = Gauge::default();
        registry.register(
            "sluice_throttle_evicted",
            "Throttle records evicted",
            throttle_evicted.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            pool_handles,
            pool_waiters,
            pool_longest_wait_ms,
            pool_events,
            cache_entries,
            cache_lookups,
            cache_removals,
            cache_hit_ratio,
            dedup_runs,
            dedup_in_flight,
            throttle_records,
            throttle_decisions,
            throttle_evicted,
        }
    }

    /// Refresh every gauge from a statistics snapshot.
    pub fn update(&self, stats: &GatewayStats) {
        let pool = &stats.pool;
        set(&self.pool_handles, "total", pool.total as u64);
        set(&self.pool_handles, "in_use", pool.in_use as u64);
        set(&self.pool_handles, "idle", pool.idle as u64);
        self.pool_waiters.set(saturate(pool.waiters as u64));
        self.pool_longest_wait_ms.set(saturate(pool.longest_wait_ms));
        set(&self.pool_events, "created", pool.created);
        set(&self.pool_events, "destroyed", pool.destroyed);
        set(&self.pool_events, "timeout", pool.timeouts);
        set(&self.pool_events, "creation_failure", pool.creation_failures);
        set(&self.pool_events, "invalid_release", pool.invalid_releases);

        let cache = &stats.cache;
        self.cache_entries.set(saturate(cache.entries as u64));
        set(&self.cache_lookups, "hit", cache.hits);
        set(&self.cache_lookups, "miss", cache.misses);
        set(&self.cache_removals, "expired", cache.expired);
        set(&self.cache_removals, "evicted", cache.evictions);
        set(&self.cache_removals, "invalidated", cache.invalidations);
        self.cache_hit_ratio.set(cache.hit_ratio());

        let dedup = &stats.dedup;
        set(&self.dedup_runs, "executed", dedup.executions);
        set(&self.dedup_runs, "coalesced", dedup.coalesced);
        self.dedup_in_flight.set(saturate(dedup.in_flight as u64));

        let throttle = &stats.throttle;
        self.throttle_records.set(saturate(throttle.records as u64));
        set(&self.throttle_decisions, "emitted", throttle.emitted);
        set(&self.throttle_decisions, "suppressed", throttle.suppressed);
        self.throttle_evicted.set(saturate(throttle.evicted));
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn set(family: &Family<KindLabels, Gauge>, kind: &str, value: u64) {
    family.get_or_create(&KindLabels::new(kind)).set(saturate(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_cache::CacheStats;
    use sluice_pool::PoolStats;

    #[test]
    fn test_metrics_state_creation() {
        let metrics = MetricsState::new();
        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("sluice_pool_waiters"));
        assert!(encoded.contains("sluice_pool_longest_wait_ms"));
        assert!(encoded.contains("sluice_cache_entries"));
    }

    #[test]
    fn test_update_from_snapshot() {
        let metrics = MetricsState::new();
        let stats = GatewayStats {
            pool: PoolStats {
                total: 3,
                in_use: 2,
                idle: 1,
                timeouts: 4,
                longest_wait_ms: 120,
                ..Default::default()
            },
            cache: CacheStats {
                entries: 7,
                hits: 3,
                misses: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        metrics.update(&stats);
        let encoded = metrics.encode().unwrap();

        assert!(encoded.contains(r#"sluice_pool_handles{kind="in_use"} 2"#));
        assert!(encoded.contains(r#"sluice_pool_events{kind="timeout"} 4"#));
        assert!(encoded.contains("sluice_pool_longest_wait_ms 120"));
        assert!(encoded.contains("sluice_cache_entries 7"));
        assert!(encoded.contains("sluice_cache_hit_ratio 0.75"));
    }
}
