//! In-flight operation sharing.

use futures::future::{BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for a [`Deduplicator`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Calls to `run`.
    pub total_runs: u64,
    /// Calls that attached to an operation already in flight.
    pub coalesced: u64,
    /// Operations actually started.
    pub executions: u64,
    /// Operations currently in flight.
    pub in_flight: usize,
}

impl DedupStats {
    /// Returns the share of calls that were coalesced.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.total_runs as f64
        }
    }
}

struct InFlight<V> {
    future: WeakShared<BoxFuture<'static, V>>,
    generation: u64,
}

struct DedupInner<K, V> {
    in_flight: Mutex<HashMap<K, InFlight<V>>>,
    next_generation: AtomicU64,
    total_runs: AtomicU64,
    coalesced: AtomicU64,
    executions: AtomicU64,
}

/// Removes an in-flight entry when its operation settles or is abandoned.
///
/// Lives inside the shared future, so it is dropped as soon as the
/// operation completes and before any caller observes the result.
struct Settle<K: Hash + Eq, V> {
    inner: Arc<DedupInner<K, V>>,
    key: K,
    generation: u64,
}

impl<K: Hash + Eq, V> Drop for Settle<K, V> {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            in_flight.remove(&self.key);
        }
    }
}

/// Collapses concurrent operations that share a key.
///
/// Cloning yields another handle to the same set of in-flight operations.
pub struct Deduplicator<K, V> {
    inner: Arc<DedupInner<K, V>>,
}

impl<K, V> Deduplicator<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty deduplicator.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DedupInner {
                in_flight: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                total_runs: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                executions: AtomicU64::new(0),
            }),
        }
    }

    /// Runs `op` for `key`, or attaches to the run already in flight.
    ///
    /// Every caller attached to one run receives a clone of its output,
    /// errors included. The entry is removed before the output reaches any
    /// caller, so a call made after that starts a new run. If every caller
    /// is dropped the operation is dropped with them.
    ///
    /// `op` is invoked while the in-flight table is locked and must only
    /// build the future.
    pub async fn run<F, Fut>(&self, key: K, op: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.inner.total_runs.fetch_add(1, Ordering::Relaxed);

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            let existing = in_flight.get(&key).and_then(|entry| entry.future.upgrade());
            match existing {
                Some(shared) => {
                    self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(in_flight = in_flight.len(), "Attached to in-flight operation");
                    shared
                }
                None => self.start(&mut in_flight, key, op()),
            }
        };

        shared.await
    }

    fn start<Fut>(
        &self,
        in_flight: &mut HashMap<K, InFlight<V>>,
        key: K,
        op: Fut,
    ) -> Shared<BoxFuture<'static, V>>
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let settle = Settle {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            generation,
        };

        let shared = async move {
            let _settle = settle;
            op.await
        }
        .boxed()
        .shared();

        if let Some(future) = shared.downgrade() {
            in_flight.insert(key, InFlight { future, generation });
        }
        self.inner.executions.fetch_add(1, Ordering::Relaxed);
        shared
    }

    /// Returns true if an operation for `key` is running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inner.in_flight.lock().contains_key(key)
    }

    /// Returns the number of operations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Returns statistics.
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            total_runs: self.inner.total_runs.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            executions: self.inner.executions.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

impl<K, V> Default for Deduplicator<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for Deduplicator<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for Deduplicator<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish()
    }
}
