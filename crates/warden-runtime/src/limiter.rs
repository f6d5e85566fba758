//! Process-wide admission limiter.
//!
//! Bounds concurrent executions with a fair (FIFO) semaphore, delays callers
//! that report prior failures with exponential backoff, and fails fast once
//! the consecutive-failure counter reaches the cascade threshold.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use warden_core::Clock;
use warden_core::backoff::BackoffConfig;
use warden_settings::LimiterSettings;

/// Limiter parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct LimiterConfig {
    /// Maximum concurrently executing tasks (at least 1).
    pub max_concurrent: usize,
    /// Delay applied to callers with prior failures.
    pub backoff: BackoffConfig,
    /// Consecutive failures at which calls fail fast.
    pub cascade_failure_threshold: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::from(&LimiterSettings::default())
    }
}

impl From<&LimiterSettings> for LimiterConfig {
    fn from(s: &LimiterSettings) -> Self {
        Self {
            max_concurrent: s.max_concurrent.max(1),
            backoff: s.backoff(),
            cascade_failure_threshold: s.cascade_failure_threshold,
        }
    }
}

/// Why [`ProcessLimiter::execute_with_limits`] did not return the task's value.
#[derive(Debug, thiserror::Error)]
pub enum LimitError<E> {
    /// Circuit breaker open; the task was not run.
    #[error(
        "Cascade failure detected: {failures} consecutive failures (threshold {threshold}); stop spawning and investigate"
    )]
    CascadeThrottled {
        /// Consecutive failures observed.
        failures: u32,
        /// Configured threshold.
        threshold: u32,
    },

    /// The limiter was closed while waiting for a slot.
    #[error("process limiter is closed")]
    Closed,

    /// The task ran and failed.
    #[error("{0}")]
    Task(E),
}

/// Health snapshot for status surfaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterHealth {
    /// Configured concurrency bound.
    pub max_concurrent: usize,
    /// Tasks currently executing.
    pub active_count: usize,
    /// Callers waiting for a slot.
    pub queued_count: usize,
    /// Tasks admitted since the last reset.
    pub total_spawned: u64,
    /// Consecutive failures.
    pub consecutive_failures: u32,
    /// Breaker threshold.
    pub cascade_threshold: u32,
    /// Whether calls currently fail fast.
    pub circuit_open: bool,
    /// Text of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Time of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at_ms: Option<u64>,
    /// Mean backoff delay actually applied.
    pub mean_backoff_ms: f64,
    /// Calls rejected by the breaker.
    pub throttled: u64,
}

#[derive(Debug, Default)]
struct LimiterState {
    active: usize,
    queued: usize,
    total_spawned: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_failure_at_ms: Option<u64>,
    total_backoff_ms: u64,
    backoff_samples: u64,
    throttled: u64,
}

/// Bounds concurrent spawns and throttles runaway failure cascades.
pub struct ProcessLimiter {
    config: LimiterConfig,
    slots: Arc<Semaphore>,
    state: Arc<Mutex<LimiterState>>,
    clock: Arc<dyn Clock>,
}

impl ProcessLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            config,
            slots: Arc::new(Semaphore::new(permits)),
            state: Arc::new(Mutex::new(LimiterState::default())),
            clock,
        }
    }

    /// Configured parameters.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Run `task` once a slot is free.
    ///
    /// `prior_failures` is the caller's own retry count; a nonzero value
    /// sleeps `min(initial * multiplier^f, max)` before queueing. Success
    /// resets the consecutive-failure counter, failure increments it.
    pub async fn execute_with_limits<T, E, F, Fut>(
        &self,
        prior_failures: u32,
        task: F,
    ) -> Result<T, LimitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.check_breaker()?;

        let delay_ms = self.config.backoff.delay_ms(prior_failures);
        if delay_ms > 0 {
            {
                let mut state = self.state.lock();
                state.total_backoff_ms = state.total_backoff_ms.saturating_add(delay_ms);
                state.backoff_samples += 1;
            }
            debug!(prior_failures, delay_ms, "backing off before admission");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let permit = {
            let _queued = CountGuard::new(&self.state, |s| &mut s.queued);
            self.slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| LimitError::Closed)?
        };

        // The breaker may have tripped while this caller was queued.
        self.check_breaker()?;

        let _active = CountGuard::new(&self.state, |s| &mut s.active);
        {
            let mut state = self.state.lock();
            state.total_spawned += 1;
            publish_active(state.active);
        }
        metrics::counter!("warden_limiter_spawned_total").increment(1);

        let result = task().await;

        // The outcome must be recorded before the slot is released.
        let outcome = {
            let mut state = self.state.lock();
            match result {
                Ok(value) => {
                    state.consecutive_failures = 0;
                    Ok(value)
                }
                Err(e) => {
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    state.last_error = Some(e.to_string());
                    state.last_failure_at_ms = Some(self.clock.now_ms());
                    warn!(
                        consecutive_failures = state.consecutive_failures,
                        error = %e,
                        "limited task failed"
                    );
                    Err(LimitError::Task(e))
                }
            }
        };
        drop(permit);
        outcome
    }

    fn check_breaker<E>(&self) -> Result<(), LimitError<E>> {
        let mut state = self.state.lock();
        let threshold = self.config.cascade_failure_threshold;
        if state.consecutive_failures >= threshold {
            state.throttled += 1;
            metrics::counter!("warden_limiter_throttled_total").increment(1);
            warn!(
                failures = state.consecutive_failures,
                threshold, "cascade failure breaker open, refusing work"
            );
            return Err(LimitError::CascadeThrottled {
                failures: state.consecutive_failures,
                threshold,
            });
        }
        Ok(())
    }

    /// Current counters.
    #[allow(clippy::cast_precision_loss)]
    pub fn health(&self) -> LimiterHealth {
        let state = self.state.lock();
        let mean_backoff_ms = if state.backoff_samples == 0 {
            0.0
        } else {
            state.total_backoff_ms as f64 / state.backoff_samples as f64
        };
        LimiterHealth {
            max_concurrent: self.config.max_concurrent,
            active_count: state.active,
            queued_count: state.queued,
            total_spawned: state.total_spawned,
            consecutive_failures: state.consecutive_failures,
            cascade_threshold: self.config.cascade_failure_threshold,
            circuit_open: state.consecutive_failures >= self.config.cascade_failure_threshold,
            last_error: state.last_error.clone(),
            last_failure_at_ms: state.last_failure_at_ms,
            mean_backoff_ms,
            throttled: state.throttled,
        }
    }

    /// Close the breaker and clear reporting totals. Live counts are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.last_error = None;
        state.last_failure_at_ms = None;
        state.total_spawned = 0;
        state.total_backoff_ms = 0;
        state.backoff_samples = 0;
        state.throttled = 0;
        debug!("process limiter reset");
    }

    /// Stop admitting. Queued and future callers get [`LimitError::Closed`].
    pub fn close(&self) {
        self.slots.close();
    }
}

impl fmt::Debug for ProcessLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLimiter")
            .field("config", &self.config)
            .field("available", &self.slots.available_permits())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_precision_loss)]
fn publish_active(active: usize) {
    metrics::gauge!("warden_limiter_active").set(active as f64);
}

/// Increments one counter of the shared state and decrements it on drop,
/// so cancelled and panicking callers are accounted for.
struct CountGuard<'a> {
    state: &'a Mutex<LimiterState>,
    field: fn(&mut LimiterState) -> &mut usize,
}

impl<'a> CountGuard<'a> {
    fn new(state: &'a Mutex<LimiterState>, field: fn(&mut LimiterState) -> &mut usize) -> Self {
        {
            let mut guard = state.lock();
            *field(&mut *guard) += 1;
        }
        Self { state, field }
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let slot = (self.field)(&mut *state);
        *slot = slot.saturating_sub(1);
        let active = state.active;
        drop(state);
        publish_active(active);
    }
}
