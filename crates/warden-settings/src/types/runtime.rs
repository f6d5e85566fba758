//! Run-governance settings: admission limits, reaping, safeguards, spawning.

use serde::{Deserialize, Serialize};
use warden_core::backoff::{
    BackoffConfig, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS,
};

/// Process limiter settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimiterSettings {
    /// Maximum concurrently executing tasks.
    pub max_concurrent: usize,
    /// Backoff base for callers reporting prior failures (ms).
    pub initial_backoff_ms: u64,
    /// Backoff cap (ms).
    pub max_backoff_ms: u64,
    /// Backoff growth factor per prior failure.
    pub backoff_multiplier: f64,
    /// Consecutive failures after which calls fail fast.
    pub cascade_failure_threshold: u32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            cascade_failure_threshold: 5,
        }
    }
}

impl LimiterSettings {
    /// The backoff portion as a core [`BackoffConfig`].
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            multiplier: self.backoff_multiplier,
        }
    }
}

/// Session reaper settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaperSettings {
    /// How long an ended run stays in the registry.
    pub completed_ttl_minutes: u64,
    /// Inactivity after which a live run counts as a zombie.
    pub zombie_inactivity_minutes: u64,
    /// Sweep period.
    pub cleanup_interval_minutes: u64,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            completed_ttl_minutes: 30,
            zombie_inactivity_minutes: 15,
            cleanup_interval_minutes: 5,
        }
    }
}

/// Per-run pipeline safeguards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SafeguardSettings {
    /// Tool-execution turns allowed before abort. `0` disables the limit.
    pub max_turns: u32,
    /// Whether repeated identical tool calls abort the run.
    pub loop_detection: bool,
    /// Consecutive identical calls that count as a loop.
    pub loop_threshold: usize,
    /// Size of the rolling call history.
    pub loop_history_size: usize,
}

impl Default for SafeguardSettings {
    fn default() -> Self {
        Self {
            max_turns: 50,
            loop_detection: true,
            loop_threshold: 3,
            loop_history_size: 10,
        }
    }
}

/// Subagent spawn admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubagentSettings {
    /// A caller at this depth or deeper may not spawn.
    pub max_spawn_depth: u32,
    /// Active direct children allowed per session.
    pub max_children_per_session: usize,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            max_spawn_depth: 2,
            max_children_per_session: 5,
        }
    }
}

/// Event pipeline settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Concurrency bound of the fire-and-forget handler pool.
    pub background_workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            background_workers: 8,
        }
    }
}
