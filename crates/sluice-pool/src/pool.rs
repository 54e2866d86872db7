//! Connection pooling for backend client handles.
//!
//! All pool bookkeeping lives behind a single mutex. A handle is always in
//! exactly one place: the idle queue, checked out by a caller, or granted to
//! a waiter that has not yet woken up. `total` counts all of those plus
//! capacity reserved for handles that are being created.

use crate::{ClientFactory, PoolConfig, PoolError};
use parking_lot::Mutex;
use serde::Serialize;
use sluice_types::{BackgroundTask, SharedClock, SystemClock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Identifier of a pooled handle, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Statistics for a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live handles plus capacity reserved for handles being created.
    pub total: usize,
    /// Handles checked out by callers.
    pub in_use: usize,
    /// Handles available for immediate reuse.
    pub idle: usize,
    /// Callers queued for a handle.
    pub waiters: usize,
    /// How long the oldest queued caller has waited, in milliseconds.
    pub longest_wait_ms: u64,
    /// Handles created over the pool's lifetime.
    pub created: u64,
    /// Handles destroyed over the pool's lifetime.
    pub destroyed: u64,
    /// Acquires that timed out.
    pub timeouts: u64,
    /// Factory failures.
    pub creation_failures: u64,
    /// Rejected releases.
    pub invalid_releases: u64,
}

struct Slot<C> {
    id: HandleId,
    client: C,
    created_at: Instant,
    last_used_at: Instant,
}

/// What a waiter is handed when it reaches the front of the queue.
enum Grant<C> {
    /// A released handle.
    Slot(Slot<C>),
    /// Room to create a new handle, already counted in `total`.
    Capacity,
}

struct Waiter {
    id: u64,
    enqueued_at: Instant,
    notify: oneshot::Sender<()>,
}

struct PoolState<C> {
    idle: VecDeque<Slot<C>>,
    waiters: VecDeque<Waiter>,
    granted: HashMap<u64, Grant<C>>,
    in_use: HashSet<HandleId>,
    total: usize,
    closed: bool,
    next_waiter_id: u64,
}

impl<C> PoolState<C> {
    /// Hands `grant` to the oldest waiter, or gives it back if nobody waits.
    fn offer(&mut self, grant: Grant<C>) -> Option<Grant<C>> {
        match self.waiters.pop_front() {
            Some(waiter) => {
                self.granted.insert(waiter.id, grant);
                let _ = waiter.notify.send(());
                None
            }
            None => Some(grant),
        }
    }

    /// Frees one unit of capacity, passing it to the oldest waiter if any.
    fn release_capacity(&mut self) {
        if self.offer(Grant::Capacity).is_some() {
            self.total -= 1;
        }
    }

    fn enqueue(&mut self, now: Instant) -> (u64, oneshot::Receiver<()>) {
        let (notify, rx) = oneshot::channel();
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter {
            id,
            enqueued_at: now,
            notify,
        });
        (id, rx)
    }

    fn granted_slots(&self) -> usize {
        self.granted
            .values()
            .filter(|grant| matches!(grant, Grant::Slot(_)))
            .count()
    }
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    timeouts: AtomicU64,
    creation_failures: AtomicU64,
    invalid_releases: AtomicU64,
}

struct PoolInner<C> {
    config: PoolConfig,
    factory: Arc<dyn ClientFactory<Client = C>>,
    clock: SharedClock,
    state: Mutex<PoolState<C>>,
    next_handle_id: AtomicU64,
    counters: PoolCounters,
}

impl<C: Send + 'static> PoolInner<C> {
    fn is_expired(&self, slot: &Slot<C>, now: Instant) -> bool {
        self.config
            .max_lifetime
            .is_some_and(|lifetime| now.saturating_duration_since(slot.created_at) >= lifetime)
    }

    fn destroy(&self, slot: Slot<C>, reason: &'static str) {
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle_id = %slot.id, reason, "Destroyed client handle");
        self.factory.destroy(slot.client);
    }

    /// Returns a checked-in slot to the idle queue or the next waiter, or
    /// hands it back for destruction.
    fn place(&self, state: &mut PoolState<C>, slot: Slot<C>, now: Instant) -> Option<Slot<C>> {
        if state.closed || self.is_expired(&slot, now) {
            state.release_capacity();
            return Some(slot);
        }

        if let Some(Grant::Slot(slot)) = state.offer(Grant::Slot(slot)) {
            state.idle.push_back(slot);
        }
        None
    }

    /// Takes back a slot that was checked out.
    fn checkin(&self, mut slot: Slot<C>) -> Result<(), PoolError> {
        let now = self.clock.now();
        slot.last_used_at = now;

        let doomed = {
            let mut state = self.state.lock();
            if !state.in_use.remove(&slot.id) {
                drop(state);
                let id = slot.id;
                self.counters.invalid_releases.fetch_add(1, Ordering::Relaxed);
                tracing::error!(handle_id = %id, "Release of a handle that is not checked out");
                self.factory.destroy(slot.client);
                return Err(PoolError::InvalidRelease { id });
            }
            self.place(&mut state, slot, now)
        };

        if let Some(slot) = doomed {
            self.destroy(slot, "retired");
        }
        Ok(())
    }

    /// Destroys a checked-out slot and frees its capacity.
    fn discard(&self, slot: Slot<C>) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock();
            if !state.in_use.remove(&slot.id) {
                drop(state);
                let id = slot.id;
                self.counters.invalid_releases.fetch_add(1, Ordering::Relaxed);
                tracing::error!(handle_id = %id, "Discard of a handle that is not checked out");
                self.factory.destroy(slot.client);
                return Err(PoolError::InvalidRelease { id });
            }
            state.release_capacity();
        }

        self.destroy(slot, "discarded");
        Ok(())
    }

    /// Creates a client for capacity already reserved in `total`.
    ///
    /// With `checkout` the new handle is marked in use; otherwise it is
    /// placed in the pool. The reservation is returned if creation fails or
    /// the future is dropped.
    async fn create_reserved(&self, checkout: bool) -> Result<Option<Slot<C>>, PoolError> {
        let mut reservation = Reservation {
            pool: self,
            armed: true,
        };

        let client = match self.factory.create().await {
            Ok(client) => client,
            Err(e) => {
                drop(reservation);
                self.counters.creation_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Failed to create client handle");
                return Err(PoolError::Creation(Arc::from(e)));
            }
        };
        reservation.armed = false;

        let now = self.clock.now();
        let id = HandleId(self.next_handle_id.fetch_add(1, Ordering::Relaxed));
        let slot = Slot {
            id,
            client,
            created_at: now,
            last_used_at: now,
        };
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle_id = %id, "Created client handle");

        let doomed = {
            let mut state = self.state.lock();
            if state.closed {
                state.total -= 1;
                Some(slot)
            } else if checkout {
                state.in_use.insert(id);
                return Ok(Some(slot));
            } else {
                self.place(&mut state, slot, now)
            }
        };

        match doomed {
            Some(slot) => {
                self.destroy(slot, "closed");
                if checkout {
                    Err(PoolError::Closed)
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// One reaper pass: destroy stale idle handles down to `min_size`, then
    /// top the pool back up to `min_size`.
    async fn maintain(&self) {
        let now = self.clock.now();
        let min_size = self.config.min_size;

        let (doomed, deficit) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            let mut doomed = Vec::new();
            let mut i = 0;
            while i < state.idle.len() && state.total > min_size {
                let slot = &state.idle[i];
                let stale = now.saturating_duration_since(slot.last_used_at) > self.config.idle_timeout
                    || self.is_expired(slot, now);
                if stale {
                    if let Some(slot) = state.idle.remove(i) {
                        state.total -= 1;
                        doomed.push(slot);
                    }
                } else {
                    i += 1;
                }
            }

            let deficit = min_size.saturating_sub(state.total);
            state.total += deficit;
            (doomed, deficit)
        };

        let reaped = doomed.len();
        for slot in doomed {
            self.destroy(slot, "idle");
        }

        let mut replenished = 0;
        for _ in 0..deficit {
            match self.create_reserved(false).await {
                Ok(_) => replenished += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to replenish pool to its minimum size");
                    break;
                }
            }
        }

        // Capacity reserved for iterations skipped after a failure.
        let skipped = deficit.saturating_sub(replenished).saturating_sub(1);
        if skipped > 0 {
            let mut state = self.state.lock();
            for _ in 0..skipped {
                state.release_capacity();
            }
        }

        if reaped > 0 || deficit > 0 {
            tracing::debug!(reaped, replenished, "Pool maintenance finished");
        }
    }

    fn longest_wait(&self, state: &PoolState<C>, now: Instant) -> Option<Duration> {
        state
            .waiters
            .front()
            .map(|w| now.saturating_duration_since(w.enqueued_at))
    }

    fn stats(&self) -> PoolStats {
        let now = self.clock.now();
        let state = self.state.lock();
        let longest_wait = self.longest_wait(&state, now).unwrap_or_default();
        PoolStats {
            total: state.total,
            in_use: state.in_use.len() + state.granted_slots(),
            idle: state.idle.len(),
            waiters: state.waiters.len(),
            longest_wait_ms: u64::try_from(longest_wait.as_millis()).unwrap_or(u64::MAX),
            created: self.counters.created.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            creation_failures: self.counters.creation_failures.load(Ordering::Relaxed),
            invalid_releases: self.counters.invalid_releases.load(Ordering::Relaxed),
        }
    }
}

/// Capacity counted in `total` for a handle that is being created.
struct Reservation<'a, C: Send + 'static> {
    pool: &'a PoolInner<C>,
    armed: bool,
}

impl<C: Send + 'static> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().release_capacity();
        }
    }
}

/// A queued acquire. Leaves the queue when finished or dropped, returning
/// anything it was granted but never claimed.
struct WaitGuard<'a, C: Send + 'static> {
    pool: &'a PoolInner<C>,
    waiter_id: u64,
    active: bool,
}

impl<C: Send + 'static> WaitGuard<'_, C> {
    /// Leaves the queue and claims the grant, if one arrived.
    fn finish(&mut self) -> Option<Grant<C>> {
        self.active = false;
        let mut state = self.pool.state.lock();
        state.waiters.retain(|w| w.id != self.waiter_id);
        let grant = state.granted.remove(&self.waiter_id);
        if let Some(Grant::Slot(slot)) = &grant {
            state.in_use.insert(slot.id);
        }
        grant
    }
}

impl<C: Send + 'static> Drop for WaitGuard<'_, C> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }

        let now = self.pool.clock.now();
        let doomed = {
            let mut state = self.pool.state.lock();
            state.waiters.retain(|w| w.id != self.waiter_id);
            match state.granted.remove(&self.waiter_id) {
                Some(Grant::Slot(slot)) => self.pool.place(&mut state, slot, now),
                Some(Grant::Capacity) => {
                    state.release_capacity();
                    None
                }
                None => None,
            }
        };

        if let Some(slot) = doomed {
            self.pool.destroy(slot, "retired");
        }
    }
}

/// A handle checked out from a [`PoolManager`].
///
/// Give it back with [`PoolManager::release`]. A handle dropped without
/// being released is returned to its pool.
pub struct PooledHandle<C: Send + 'static> {
    id: HandleId,
    slot: Option<Slot<C>>,
    pool: Arc<PoolInner<C>>,
}

impl<C: Send + 'static> PooledHandle<C> {
    /// Returns the handle identifier.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Returns a reference to the underlying client.
    pub fn client(&self) -> &C {
        &self.slot.as_ref().expect("pooled handle used after release").client
    }

    /// Returns a mutable reference to the underlying client.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.slot.as_mut().expect("pooled handle used after release").client
    }

    /// Returns when the underlying client was created.
    pub fn created_at(&self) -> Instant {
        self.slot
            .as_ref()
            .map_or_else(|| self.pool.clock.now(), |slot| slot.created_at)
    }

    /// Returns when the handle was last returned to the pool.
    pub fn last_used_at(&self) -> Instant {
        self.slot
            .as_ref()
            .map_or_else(|| self.pool.clock.now(), |slot| slot.last_used_at)
    }
}

impl<C: Send + 'static> std::ops::Deref for PooledHandle<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.client()
    }
}

impl<C: Send + 'static> std::ops::DerefMut for PooledHandle<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client_mut()
    }
}

impl<C: Send + 'static> fmt::Debug for PooledHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Drop for PooledHandle<C> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(handle_id = %self.id, "Handle dropped without release, returning to pool");
            let _ = self.pool.checkin(slot);
        }
    }
}

/// A bounded pool of backend client handles.
pub struct PoolManager<C: Send + 'static> {
    inner: Arc<PoolInner<C>>,
    reaper: Mutex<Option<BackgroundTask>>,
}

impl<C: Send + 'static> PoolManager<C> {
    /// Starts a pool: creates `min_size` handles and spawns the idle reaper.
    ///
    /// Warm-up failures are logged and left to the reaper to retry. Must be
    /// called from within a tokio runtime.
    pub async fn start<F>(factory: F, config: PoolConfig) -> Result<Self, PoolError>
    where
        F: ClientFactory<Client = C>,
    {
        Self::start_with_clock(Arc::new(factory), config, SystemClock::shared()).await
    }

    /// Starts a pool with an explicit clock.
    pub async fn start_with_clock(
        factory: Arc<dyn ClientFactory<Client = C>>,
        config: PoolConfig,
        clock: SharedClock,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let reap_interval = config.reap_interval;
        let min_size = config.min_size;
        let inner = Arc::new(PoolInner {
            config,
            factory,
            clock,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                granted: HashMap::new(),
                in_use: HashSet::new(),
                total: 0,
                closed: false,
                next_waiter_id: 0,
            }),
            next_handle_id: AtomicU64::new(1),
            counters: PoolCounters::default(),
        });

        inner.maintain().await;

        let weak = Arc::downgrade(&inner);
        let reaper = BackgroundTask::spawn_periodic("pool-reaper", reap_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.maintain().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });

        let stats = inner.stats();
        tracing::info!(
            min_size,
            max_size = inner.config.max_size,
            warm = stats.idle,
            "Pool started"
        );

        Ok(Self {
            inner,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquires a handle, waiting up to the configured `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PooledHandle<C>, PoolError> {
        self.acquire_with_timeout(self.inner.config.acquire_timeout)
            .await
    }

    /// Acquires a handle, waiting up to `timeout` for one to be released.
    pub async fn acquire_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledHandle<C>, PoolError> {
        enum Step<C> {
            Ready(Slot<C>),
            Create,
            Wait(u64, oneshot::Receiver<()>),
        }

        let inner = &*self.inner;
        let now = inner.clock.now();

        let (step, doomed) = {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }

            let mut doomed = None;
            let step = match state.idle.pop_back() {
                Some(slot) if inner.is_expired(&slot, now) => {
                    // Reuse the expired handle's capacity for a fresh one.
                    doomed = Some(slot);
                    Step::Create
                }
                Some(slot) => {
                    state.in_use.insert(slot.id);
                    Step::Ready(slot)
                }
                None if state.total < inner.config.max_size => {
                    state.total += 1;
                    Step::Create
                }
                None => {
                    let (id, rx) = state.enqueue(now);
                    Step::Wait(id, rx)
                }
            };
            (step, doomed)
        };

        if let Some(slot) = doomed {
            inner.destroy(slot, "expired");
        }

        match step {
            Step::Ready(slot) => Ok(self.wrap(slot)),
            Step::Create => self.create_checked_out().await,
            Step::Wait(waiter_id, rx) => self.wait(waiter_id, rx, timeout).await,
        }
    }

    async fn create_checked_out(&self) -> Result<PooledHandle<C>, PoolError> {
        match self.inner.create_reserved(true).await? {
            Some(slot) => Ok(self.wrap(slot)),
            None => Err(PoolError::Closed),
        }
    }

    async fn wait(
        &self,
        waiter_id: u64,
        rx: oneshot::Receiver<()>,
        timeout: Duration,
    ) -> Result<PooledHandle<C>, PoolError> {
        let mut guard = WaitGuard {
            pool: &*self.inner,
            waiter_id,
            active: true,
        };

        tracing::debug!(waiter_id, timeout_ms = timeout.as_millis() as u64, "Waiting for a client handle");
        let outcome = tokio::time::timeout(timeout, rx).await;

        // Dequeue and claim in one step: a grant that raced the timeout is
        // still honored, and nothing can be granted after this point.
        match guard.finish() {
            Some(Grant::Slot(slot)) => Ok(self.wrap(slot)),
            Some(Grant::Capacity) => self.create_checked_out().await,
            None => match outcome {
                Err(_) => {
                    self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        waiter_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Timed out waiting for a client handle"
                    );
                    Err(PoolError::Timeout { waited: timeout })
                }
                Ok(_) => Err(PoolError::Closed),
            },
        }
    }

    fn wrap(&self, slot: Slot<C>) -> PooledHandle<C> {
        PooledHandle {
            id: slot.id,
            slot: Some(slot),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Returns a handle to the pool.
    ///
    /// The handle goes straight to the oldest waiter if there is one.
    /// Releasing a handle that this pool did not hand out is rejected.
    pub fn release(&self, mut handle: PooledHandle<C>) -> Result<(), PoolError> {
        let id = handle.id;
        if !Arc::ptr_eq(&handle.pool, &self.inner) {
            self.inner.counters.invalid_releases.fetch_add(1, Ordering::Relaxed);
            tracing::error!(handle_id = %id, "Release of a handle that belongs to another pool");
            return Err(PoolError::InvalidRelease { id });
        }

        match handle.slot.take() {
            Some(slot) => self.inner.checkin(slot),
            None => Err(PoolError::InvalidRelease { id }),
        }
    }

    /// Destroys a handle the caller knows is broken.
    pub fn discard(&self, mut handle: PooledHandle<C>) -> Result<(), PoolError> {
        let id = handle.id;
        if !Arc::ptr_eq(&handle.pool, &self.inner) {
            self.inner.counters.invalid_releases.fetch_add(1, Ordering::Relaxed);
            tracing::error!(handle_id = %id, "Discard of a handle that belongs to another pool");
            return Err(PoolError::InvalidRelease { id });
        }

        match handle.slot.take() {
            Some(slot) => self.inner.discard(slot),
            None => Err(PoolError::InvalidRelease { id }),
        }
    }

    /// Runs one reaper pass immediately.
    pub async fn reap_now(&self) {
        self.inner.maintain().await;
    }

    /// Returns pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Returns how long the oldest waiter has been queued.
    pub fn longest_wait(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock();
        self.inner.longest_wait(&state, now)
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Stops the reaper, destroys idle handles and fails every waiter,
    /// including waiters granted a handle they have not yet claimed.
    ///
    /// Handles still checked out are destroyed when released.
    pub async fn shutdown(&self) {
        let (doomed, failed_waiters) = {
            let mut state = self.inner.state.lock();
            state.closed = true;

            let mut doomed: Vec<_> = state.idle.drain(..).collect();
            let mut released = doomed.len();
            let waiters = state.waiters.drain(..).count();

            // Revoke unclaimed grants so their waiters fail too.
            let granted: Vec<_> = state.granted.drain().map(|(_, grant)| grant).collect();
            released += granted.len();
            let revoked = granted.len();
            for grant in granted {
                if let Grant::Slot(slot) = grant {
                    doomed.push(slot);
                }
            }

            state.total -= released;
            (doomed, waiters + revoked)
        };

        let destroyed = doomed.len();
        for slot in doomed {
            self.inner.destroy(slot, "shutdown");
        }

        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }

        tracing::info!(destroyed, failed_waiters, "Pool shut down");
    }
}

impl<C: Send + 'static> fmt::Debug for PoolManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.inner.config)
            .field("stats", &self.inner.stats())
            .finish()
    }
}
