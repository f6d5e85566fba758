//! Session reaping: TTL expiry of ended runs and zombie detection.
//!
//! [`ReaperPolicy`] classifies records; [`SessionReaper`] only schedules a
//! caller-supplied sweep. Deleting records and aborting zombies is the
//! caller's job (see `ControlPlane::sweep`).

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;
use warden_core::SessionKey;
use warden_settings::ReaperSettings;

use crate::registry::RunRecord;

const MS_PER_MINUTE: u64 = 60_000;

/// Classification of one record at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Live and recently active.
    Active,
    /// Ended.
    Completed,
    /// Live but silent past the inactivity threshold.
    Zombie,
}

/// TTL thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaperPolicy {
    /// How long an ended run is kept.
    pub completed_ttl_ms: u64,
    /// Silence after which a live run is a zombie.
    pub zombie_inactivity_ms: u64,
}

impl Default for ReaperPolicy {
    fn default() -> Self {
        Self::from(&ReaperSettings::default())
    }
}

impl From<&ReaperSettings> for ReaperPolicy {
    fn from(s: &ReaperSettings) -> Self {
        Self {
            completed_ttl_ms: s.completed_ttl_minutes.saturating_mul(MS_PER_MINUTE),
            zombie_inactivity_ms: s.zombie_inactivity_minutes.saturating_mul(MS_PER_MINUTE),
        }
    }
}

impl ReaperPolicy {
    /// Ended at least `completed_ttl_ms` ago. Always false for live runs.
    #[must_use]
    pub fn is_completed_expired(&self, run: &RunRecord, now_ms: u64) -> bool {
        run.ended_at_ms
            .is_some_and(|ended| now_ms.saturating_sub(ended) >= self.completed_ttl_ms)
    }

    /// Live with no activity, or silent for at least `zombie_inactivity_ms`.
    #[must_use]
    pub fn is_zombie(&self, run: &RunRecord, now_ms: u64) -> bool {
        if run.ended_at_ms.is_some() {
            return false;
        }
        match run.last_activity_at_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.zombie_inactivity_ms,
        }
    }

    /// Exactly one state per record; ended wins over zombie.
    #[must_use]
    pub fn classify(&self, run: &RunRecord, now_ms: u64) -> SessionState {
        if run.ended_at_ms.is_some() {
            SessionState::Completed
        } else if self.is_zombie(run, now_ms) {
            SessionState::Zombie
        } else {
            SessionState::Active
        }
    }

    /// Split `records` into disjoint cleanup sets plus counts.
    #[must_use]
    pub fn identify_cleanup_targets(&self, records: &[RunRecord], now_ms: u64) -> CleanupTargets {
        let mut targets = CleanupTargets::default();
        targets.metrics.total = records.len();
        for run in records {
            match self.classify(run, now_ms) {
                SessionState::Active => targets.metrics.active += 1,
                SessionState::Completed => {
                    targets.metrics.completed += 1;
                    if self.is_completed_expired(run, now_ms) {
                        targets.metrics.expired_completed += 1;
                        targets.expired_completed.push(run.session_key.clone());
                    }
                }
                SessionState::Zombie => {
                    targets.metrics.zombie += 1;
                    targets.zombies.push(run.session_key.clone());
                }
            }
        }
        targets
    }
}

/// Counts reported by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepMetrics {
    /// All records examined.
    pub total: usize,
    /// Live and active.
    pub active: usize,
    /// Ended (expired or not).
    pub completed: usize,
    /// Live but silent.
    pub zombie: usize,
    /// Ended past the TTL.
    pub expired_completed: usize,
}

impl fmt::Display for SweepMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sessions: total={} active={} completed={} zombie={} expiredCompleted={}",
            self.total, self.active, self.completed, self.zombie, self.expired_completed
        )
    }
}

/// Keys to delete, plus the counts behind them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupTargets {
    /// Ended runs past their TTL.
    pub expired_completed: Vec<SessionKey>,
    /// Silent live runs.
    pub zombies: Vec<SessionKey>,
    /// Aggregate counts.
    pub metrics: SweepMetrics,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Periodic sweep timer.
///
/// Runs as a tokio task, so it never keeps the process alive by itself.
/// Dropping the reaper stops the timer.
pub struct SessionReaper {
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionReaper {
    /// Create a stopped reaper with the given period.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            task: Mutex::new(None),
        }
    }

    /// Reaper with the configured cleanup interval.
    #[must_use]
    pub fn from_settings(settings: &ReaperSettings) -> Self {
        Self::new(Duration::from_secs(
            settings.cleanup_interval_minutes.saturating_mul(60),
        ))
    }

    /// Sweep period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start invoking `sweep` every interval. The first call happens one full
    /// interval after start. Returns `false` if already running.
    pub fn start<F>(&self, sweep: F) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let _ = ticker.tick().await;
                sweep();
            }
        }));
        debug!(interval = ?period, "session reaper started");
        true
    }

    /// Stop the timer. Returns `true` if it was running.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                debug!("session reaper stopped");
                true
            }
            None => false,
        }
    }

    /// Whether the timer task is alive.
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for SessionReaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionReaper")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
