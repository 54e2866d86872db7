//! The throttle guard.

use crate::{InvalidConfig, ThrottleConfig};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sluice_types::{BackgroundTask, SharedClock, SystemClock};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Throttle statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    /// Records currently held.
    pub records: usize,
    /// Checks that allowed an emission.
    pub emitted: u64,
    /// Checks that suppressed an emission.
    pub suppressed: u64,
    /// Records dropped by cleanup or size pressure.
    pub evicted: u64,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Records older than the largest cooldown in use.
    pub expired: usize,
    /// Records trimmed to get back under the cap.
    pub evicted: usize,
}

struct ThrottleState {
    /// Last emission per key, least recently emitted first.
    records: LruCache<String, Instant>,
    /// Largest cooldown seen so far.
    max_cooldown: Duration,
}

/// Suppresses repeated emissions of the same event within a cooldown.
pub struct ThrottleGuard {
    config: ThrottleConfig,
    clock: SharedClock,
    state: Mutex<ThrottleState>,
    emitted: AtomicU64,
    suppressed: AtomicU64,
    evicted: AtomicU64,
}

impl ThrottleGuard {
    /// Creates a guard driven by the runtime clock.
    pub fn new(config: ThrottleConfig) -> Result<Self, InvalidConfig> {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a guard with an explicit clock.
    pub fn with_clock(config: ThrottleConfig, clock: SharedClock) -> Result<Self, InvalidConfig> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            state: Mutex::new(ThrottleState {
                records: LruCache::unbounded(),
                max_cooldown: Duration::ZERO,
            }),
            emitted: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        })
    }

    /// Returns the guard configuration.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Returns true if an event with `key` should be emitted now.
    ///
    /// An emission is allowed when there is no record for the key or the
    /// record is at least `cooldown` old; the record is then set to now.
    /// A suppressed check leaves the record untouched.
    pub fn should_emit(&self, key: impl AsRef<str>, cooldown: Duration) -> bool {
        let key = key.as_ref();
        let now = self.clock.now();
        let mut state = self.state.lock();

        let suppress = state
            .records
            .peek(key)
            .is_some_and(|last| now.saturating_duration_since(*last) < cooldown);
        if suppress {
            drop(state);
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        state.records.put(key.to_string(), now);
        state.max_cooldown = state.max_cooldown.max(cooldown);

        if state.records.len() > self.config.max_records {
            let trimmed = self.trim(&mut state);
            tracing::debug!(
                trimmed,
                records = state.records.len(),
                "Throttle records over cap, trimmed"
            );
        }
        drop(state);

        self.emitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Removes records older than the largest cooldown in use, then trims
    /// to the retained share of the cap if still over it.
    pub fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let mut expired = 0;
        let max_cooldown = state.max_cooldown;
        while let Some((_, last)) = state.records.peek_lru() {
            if now.saturating_duration_since(*last) < max_cooldown {
                break;
            }
            state.records.pop_lru();
            expired += 1;
        }

        let evicted = if state.records.len() > self.config.max_records {
            self.trim(&mut state)
        } else {
            0
        };
        drop(state);

        self.evicted.fetch_add(expired as u64, Ordering::Relaxed);
        CleanupReport { expired, evicted }
    }

    /// Evicts least recently emitted records down to the retained share.
    fn trim(&self, state: &mut ThrottleState) -> usize {
        let retained = self.config.retained_records();
        let mut trimmed = 0;
        while state.records.len() > retained {
            if state.records.pop_lru().is_none() {
                break;
            }
            trimmed += 1;
        }
        self.evicted.fetch_add(trimmed as u64, Ordering::Relaxed);
        trimmed
    }

    /// Returns the number of records held.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns throttle statistics.
    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            records: self.len(),
            emitted: self.emitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Spawns the periodic cleanup task.
    ///
    /// The task stops once the guard is dropped. Must be called from within
    /// a tokio runtime.
    pub fn spawn_cleanup(self: &Arc<Self>) -> BackgroundTask {
        let weak = Arc::downgrade(self);
        BackgroundTask::spawn_periodic("throttle-cleanup", self.config.cleanup_interval, move || {
            let weak = weak.clone();
            async move {
                let Some(guard) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let report = guard.cleanup();
                if report.expired > 0 || report.evicted > 0 {
                    tracing::debug!(
                        expired = report.expired,
                        evicted = report.evicted,
                        "Throttle cleanup finished"
                    );
                }
                ControlFlow::Continue(())
            }
        })
    }
}

impl std::fmt::Debug for ThrottleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleGuard")
            .field("config", &self.config)
            .field("records", &self.len())
            .finish()
    }
}
