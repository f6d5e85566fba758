//! Backoff configuration and delay calculation.
//!
//! The process limiter sleeps before admitting a caller that reports prior
//! failures. This module holds the portable math; the async sleep lives in
//! `warden-runtime`.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default initial backoff in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
/// Default maximum backoff in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
/// Default growth factor per prior failure.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Exponential backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Delay base in ms (default: 1000).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay in ms (default: 30000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor per prior failure (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}
fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}
fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl BackoffConfig {
    /// Delay for a caller reporting `failures` prior failures.
    #[must_use]
    pub fn delay_ms(&self, failures: u32) -> u64 {
        calculate_backoff_ms(
            failures,
            self.initial_backoff_ms,
            self.multiplier,
            self.max_backoff_ms,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff without jitter.
///
/// Formula: `min(initial_ms * multiplier^failures, max_ms)`. Zero prior
/// failures means no delay at all. A non-finite or sub-1 multiplier is
/// treated as 1 so the delay never shrinks below `initial_ms`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn calculate_backoff_ms(failures: u32, initial_ms: u64, multiplier: f64, max_ms: u64) -> u64 {
    if failures == 0 {
        return 0;
    }
    let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    };
    let exponent = failures.min(1024) as i32;
    let raw = (initial_ms as f64) * multiplier.powi(exponent);
    if !raw.is_finite() || raw >= max_ms as f64 {
        return max_ms;
    }
    (raw.round() as u64).min(max_ms)
}
