//! Settings type definitions.
//!
//! Every section uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial JSON file deserializes cleanly over compiled defaults.

mod runtime;

pub use runtime::{
    LimiterSettings, PipelineSettings, ReaperSettings, SafeguardSettings, SubagentSettings,
};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// Settings schema version.
    pub version: String,
    /// Process limiter.
    pub limiter: LimiterSettings,
    /// Session reaper.
    pub reaper: ReaperSettings,
    /// Pipeline safeguards.
    pub safeguards: SafeguardSettings,
    /// Authorization grants.
    pub grants: GrantSettings,
    /// Subagent spawn admission.
    pub subagents: SubagentSettings,
    /// Event pipeline.
    pub pipeline: PipelineSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl Default for WardenSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            limiter: LimiterSettings::default(),
            reaper: ReaperSettings::default(),
            safeguards: SafeguardSettings::default(),
            grants: GrantSettings::default(),
            subagents: SubagentSettings::default(),
            pipeline: PipelineSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl WardenSettings {
    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.max_concurrent == 0 {
            return Err(SettingsError::InvalidValue(
                "limiter.maxConcurrent must be at least 1".into(),
            ));
        }
        if self.limiter.initial_backoff_ms > self.limiter.max_backoff_ms {
            return Err(SettingsError::InvalidValue(
                "limiter.initialBackoffMs must not exceed limiter.maxBackoffMs".into(),
            ));
        }
        if self.reaper.cleanup_interval_minutes == 0 {
            return Err(SettingsError::InvalidValue(
                "reaper.cleanupIntervalMinutes must be at least 1".into(),
            ));
        }
        if self.safeguards.loop_threshold < 2 {
            return Err(SettingsError::InvalidValue(
                "safeguards.loopThreshold must be at least 2".into(),
            ));
        }
        if self.safeguards.loop_history_size < self.safeguards.loop_threshold {
            return Err(SettingsError::InvalidValue(
                "safeguards.loopHistorySize must be at least safeguards.loopThreshold".into(),
            ));
        }
        if self.pipeline.background_workers == 0 {
            return Err(SettingsError::InvalidValue(
                "pipeline.backgroundWorkers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Authorization grant settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrantSettings {
    /// TTL applied when an issue request carries none (clamped to 30..=600).
    pub default_ttl_seconds: f64,
}

impl Default for GrantSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 120.0,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
