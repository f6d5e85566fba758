//! Bounded pool for fire-and-forget handler work.
//!
//! Tasks are tracked in a [`JoinSet`] owned by the tracker, so dropping the
//! tracker aborts whatever is still running. A semaphore bounds how many
//! execute at once; the rest wait inside their own task. Panics are caught,
//! logged and swallowed.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

/// Default worker bound.
pub const DEFAULT_BACKGROUND_WORKERS: usize = 8;

/// Tracks background handler tasks for eventual draining.
pub struct BackgroundTracker {
    tasks: Mutex<JoinSet<()>>,
    workers: Arc<Semaphore>,
    pending: Arc<Pending>,
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl BackgroundTracker {
    /// Tracker running at most `workers` tasks at once.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            pending: Arc::new(Pending::default()),
        }
    }

    /// Spawn a tracked task. Must be called within a tokio runtime.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.pending.count.fetch_add(1, Ordering::SeqCst);
        let pending = PendingGuard(Arc::clone(&self.pending));
        let workers = Arc::clone(&self.workers);

        let mut tasks = self.tasks.lock();
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        let _ = tasks.spawn(async move {
            let _pending = pending;
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            if let Err(panic) = AssertUnwindSafe(future).catch_unwind().await {
                warn!(panic = panic_message(panic.as_ref()), "background handler panicked");
            }
        });
    }

    /// Wait until every task spawned so far has finished.
    pub async fn drain_all(&self) {
        loop {
            let mut idle = pin!(self.pending.idle.notified());
            let _ = idle.as_mut().enable();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// [`drain_all`](Self::drain_all) bounded by `timeout`. Returns `true`
    /// when everything finished in time. Unfinished tasks keep running.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain_all()).await.is_ok()
    }

    /// Tasks spawned and not yet finished.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }
}

impl Default for BackgroundTracker {
    fn default() -> Self {
        Self::new(DEFAULT_BACKGROUND_WORKERS)
    }
}

impl std::fmt::Debug for BackgroundTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTracker")
            .field("pending_count", &self.pending_count())
            .finish_non_exhaustive()
    }
}

struct PendingGuard(Arc<Pending>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
