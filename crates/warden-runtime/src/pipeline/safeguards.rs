//! Per-run safeguards evaluated on every tool execution start.
//!
//! - **Max turns**: each tool start is a turn; exceeding the limit trips once.
//! - **Loop detection**: the same `(tool, args)` pair `loop_threshold` times in
//!   a row trips. Any differing call in between breaks the streak.

use std::collections::VecDeque;
use std::fmt;
use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use sha2::{Digest, Sha256};
use warden_settings::SafeguardSettings;

/// Safeguard thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeguardConfig {
    /// Turn limit; `None` disables it.
    pub max_turns: Option<u32>,
    /// Whether loop detection is on.
    pub loop_detection: bool,
    /// Consecutive identical calls that count as a loop (at least 2).
    pub loop_threshold: usize,
    /// Rolling history length (at least `loop_threshold`).
    pub loop_history_size: usize,
}

impl Default for SafeguardConfig {
    fn default() -> Self {
        Self::from(&SafeguardSettings::default())
    }
}

impl From<&SafeguardSettings> for SafeguardConfig {
    fn from(s: &SafeguardSettings) -> Self {
        let loop_threshold = s.loop_threshold.max(2);
        Self {
            max_turns: (s.max_turns > 0).then_some(s.max_turns),
            loop_detection: s.loop_detection,
            loop_threshold,
            loop_history_size: s.loop_history_size.max(loop_threshold),
        }
    }
}

/// A safeguard that fired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SafeguardTrip {
    /// The run used more tool turns than allowed.
    MaxTurnsExceeded {
        /// Configured limit.
        limit: u32,
        /// Turn count that exceeded it.
        turns: u32,
    },
    /// The run repeated the same tool call.
    LoopDetected {
        /// Repeated tool.
        tool_name: String,
        /// Consecutive repeats observed.
        repeats: usize,
    },
}

impl fmt::Display for SafeguardTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxTurnsExceeded { limit, turns } => {
                write!(f, "max turns exceeded: {turns} tool turns (limit {limit})")
            }
            Self::LoopDetected { tool_name, repeats } => write!(
                f,
                "loop detected: {tool_name} called {repeats} times in a row with identical arguments"
            ),
        }
    }
}

/// Safeguard counters for one run.
#[derive(Debug)]
pub struct Safeguards {
    config: SafeguardConfig,
    turns: u32,
    max_turns_tripped: bool,
    history: VecDeque<(String, String)>,
}

impl Safeguards {
    /// Fresh counters.
    #[must_use]
    pub fn new(config: SafeguardConfig) -> Self {
        let capacity = config.loop_history_size;
        Self {
            config,
            turns: 0,
            max_turns_tripped: false,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Tool turns counted so far.
    pub fn turns(&self) -> u32 {
        self.turns
    }

    /// Record one tool execution start and return whatever tripped.
    pub fn on_tool_start(&mut self, tool_name: &str, args: &Value) -> Vec<SafeguardTrip> {
        let mut trips = Vec::new();

        if let Some(limit) = self.config.max_turns {
            if !self.max_turns_tripped {
                self.turns = self.turns.saturating_add(1);
                if self.turns > limit {
                    self.max_turns_tripped = true;
                    trips.push(SafeguardTrip::MaxTurnsExceeded {
                        limit,
                        turns: self.turns,
                    });
                }
            }
        } else {
            self.turns = self.turns.saturating_add(1);
        }

        if self.config.loop_detection {
            let entry = (tool_name.to_string(), args_fingerprint(args));
            if self.history.len() == self.config.loop_history_size {
                let _ = self.history.pop_front();
            }
            self.history.push_back(entry);

            let threshold = self.config.loop_threshold;
            let streak = self
                .history
                .iter()
                .rev()
                .take_while(|e| self.history.back() == Some(*e))
                .count();
            if streak >= threshold {
                self.history.clear();
                trips.push(SafeguardTrip::LoopDetected {
                    tool_name: tool_name.to_string(),
                    repeats: streak,
                });
            }
        }

        trips
    }
}

/// Base64url SHA-256 of the canonical (sorted-key) JSON encoding of `args`.
pub fn args_fingerprint(args: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(args, &mut canonical);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
