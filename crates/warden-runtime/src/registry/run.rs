//! Run records.

use std::fmt;

use serde::{Deserialize, Serialize};
use warden_core::{RunId, SessionKey};

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Finished normally.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by an abort request.
    Aborted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One agent execution unit, root or subagent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Hierarchical key; lineage derives from it.
    pub session_key: SessionKey,
    /// Identifier of this execution.
    pub run_id: RunId,
    /// Cached parent key (absent for roots).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_key: Option<SessionKey>,
    /// Registration time (ms).
    pub started_at_ms: u64,
    /// Last observed event (ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at_ms: Option<u64>,
    /// Set exactly once when the run ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    /// How the run ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// Error text or abort reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_note: Option<String>,
}

impl RunRecord {
    /// A live run starting at `now_ms` with a fresh run ID.
    #[must_use]
    pub fn started(session_key: SessionKey, now_ms: u64) -> Self {
        Self {
            parent_session_key: session_key.parent(),
            session_key,
            run_id: RunId::new(),
            started_at_ms: now_ms,
            last_activity_at_ms: Some(now_ms),
            ended_at_ms: None,
            outcome: None,
            end_note: None,
        }
    }

    /// Whether the run has not ended.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ended_at_ms.is_none()
    }
}
