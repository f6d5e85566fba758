//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WardenSettings::default()`]
//! 2. If `~/.warden/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `WARDEN_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::WardenSettings;

/// Resolve the path to the settings file (`~/.warden/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".warden").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WardenSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WardenSettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, resolving env overrides through `lookup`.
pub fn load_settings_with_env<F>(path: &Path, lookup: F) -> Result<WardenSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(WardenSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WardenSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WARDEN_*` overrides read through `lookup`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are logged
/// and ignored.
#[allow(clippy::cast_precision_loss)]
pub fn apply_env_overrides<F>(settings: &mut WardenSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Limiter ─────────────────────────────────────────────────────
    if let Some(v) = env.usize("WARDEN_MAX_CONCURRENT", 1, 1024) {
        settings.limiter.max_concurrent = v;
    }
    if let Some(v) = env.u64("WARDEN_INITIAL_BACKOFF_MS", 0, 3_600_000) {
        settings.limiter.initial_backoff_ms = v;
    }
    if let Some(v) = env.u64("WARDEN_MAX_BACKOFF_MS", 0, 3_600_000) {
        settings.limiter.max_backoff_ms = v;
    }

    // ── Reaper ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("WARDEN_COMPLETED_TTL_MINUTES", 1, 10_080) {
        settings.reaper.completed_ttl_minutes = v;
    }
    if let Some(v) = env.u64("WARDEN_ZOMBIE_INACTIVITY_MINUTES", 1, 10_080) {
        settings.reaper.zombie_inactivity_minutes = v;
    }
    if let Some(v) = env.u64("WARDEN_CLEANUP_INTERVAL_MINUTES", 1, 1_440) {
        settings.reaper.cleanup_interval_minutes = v;
    }

    // ── Safeguards ──────────────────────────────────────────────────
    if let Some(v) = env.u64("WARDEN_MAX_TURNS", 0, 100_000) {
        settings.safeguards.max_turns = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.bool("WARDEN_LOOP_DETECTION") {
        settings.safeguards.loop_detection = v;
    }

    // ── Grants / subagents ──────────────────────────────────────────
    if let Some(v) = env.u64("WARDEN_GRANT_TTL_SECONDS", 1, 86_400) {
        settings.grants.default_ttl_seconds = v as f64;
    }
    if let Some(v) = env.u64("WARDEN_MAX_SPAWN_DEPTH", 0, 16) {
        settings.subagents.max_spawn_depth = u32::try_from(v).unwrap_or(16);
    }
    if let Some(v) = env.usize("WARDEN_MAX_CHILDREN", 1, 1024) {
        settings.subagents.max_children_per_session = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("WARDEN_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
