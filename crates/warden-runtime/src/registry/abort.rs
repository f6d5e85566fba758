//! Cooperative abort handle for in-process runs.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus the reason of the first abort request.
///
/// Created with the run and observed by the run's own loop at safe points.
/// Safeguard trips and external kills go through the same handle.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl AbortHandle {
    /// A fresh, un-aborted handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop.
    ///
    /// Returns `true` if this call performed the abort, `false` if the run
    /// was already aborted (the first reason is kept).
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let mut slot = self.reason.lock();
        if self.token.is_cancelled() {
            return false;
        }
        *slot = Some(reason.into());
        self.token.cancel();
        true
    }

    /// Whether an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason of the first abort request.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// A clone of the underlying token, for `select!` loops.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once an abort is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let handle = AbortHandle::new();
        assert!(!handle.is_aborted());
        assert!(handle.abort("loop detected"));
        assert!(!handle.abort("killed"));
        assert!(handle.is_aborted());
        assert_eq!(handle.reason().as_deref(), Some("loop detected"));
    }

    #[test]
    fn clones_share_state() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        let _ = clone.abort("x");
        assert!(handle.is_aborted());
        assert!(handle.token().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_abort() {
        let handle = AbortHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        let _ = handle.abort("stop");
        task.await.unwrap();
    }
}
