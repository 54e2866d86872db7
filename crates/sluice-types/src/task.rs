//! Owned periodic background tasks.
//!
//! Reapers and sweepers are not fire-and-forget timers: whoever spawns one
//! holds a [`BackgroundTask`] and stops it explicitly with
//! [`BackgroundTask::shutdown`]. Dropping the handle signals the task to stop
//! at its next wake-up.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Handle to a periodic task spawned on the tokio runtime.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawns `tick` every `period`, starting one period from now.
    ///
    /// The task ends when `tick` returns [`ControlFlow::Break`] or when the
    /// handle is shut down or dropped. Must be called from within a tokio
    /// runtime.
    pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Background task started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if tick().await.is_break() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(task = name, "Background task stopped");
        });

        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Returns the task name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the task to stop and waits for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task = self.name, error = %e, "Background task ended abnormally");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_period() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);

        let task = BackgroundTask::spawn_periodic("test", Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);

        let task = BackgroundTask::spawn_periodic("test", Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        task.shutdown().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_ends_task() {
        let task = BackgroundTask::spawn_periodic("once", Duration::from_secs(1), || async {
            ControlFlow::Break(())
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(task.is_finished());
        assert_eq!(task.name(), "once");
    }
}
