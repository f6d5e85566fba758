//! Hierarchical session keys.
//!
//! Grammar:
//!
//! ```text
//! key      = "agent" ":" agent-id ":" segment *( ":" segment ) *( ":subagent:" child-id )
//! segment  = 1*128( ALPHA / DIGIT / "-" / "_" / "." )
//! ```
//!
//! The portion before the first `subagent` marker is the root portion. After
//! the first marker the remainder must be `subagent:<id>` pairs, one pair per
//! generation. There is no escaping, so a segment can never contain `:`.
//!
//! Lineage is purely structural: `a` is an ancestor of `b` iff `b` is `a`
//! followed by one or more `subagent:<id>` pairs. `agent:main:main` is
//! therefore unrelated to `agent:main:mainline` and to
//! `agent:main:main:telegram`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SEPARATOR: char = ':';
const ROOT_SEGMENT: &str = "agent";
const SUBAGENT_MARKER: &str = "subagent";
const MAX_SEGMENT_LEN: usize = 128;
const MAX_KEY_LEN: usize = 512;

/// Why a string is not a valid session key.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionKeyError {
    /// The key is empty.
    #[error("session key is empty")]
    Empty,
    /// The key exceeds the maximum length.
    #[error("session key is longer than {MAX_KEY_LEN} bytes")]
    TooLong,
    /// The key does not start with the `agent` segment.
    #[error("session key must start with \"agent:\"")]
    MissingRoot,
    /// The key has fewer than three segments.
    #[error("session key needs at least three segments (agent:<agentId>:<suffix>)")]
    TooShort,
    /// A segment is empty or contains a disallowed character.
    #[error("invalid segment {index} in session key: {reason}")]
    InvalidSegment {
        /// Zero-based segment index.
        index: usize,
        /// What is wrong with the segment.
        reason: &'static str,
    },
    /// A `subagent` marker appears in the root portion, or is not followed by
    /// exactly one child ID.
    #[error("malformed subagent lineage in session key")]
    MalformedLineage,
}

/// A validated hierarchical session key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey {
    raw: String,
    /// Byte offset where the subagent lineage starts (`raw.len()` for roots).
    root_len: usize,
    depth: u32,
}

impl SessionKey {
    /// Parse and validate a session key.
    pub fn parse(raw: &str) -> Result<Self, SessionKeyError> {
        if raw.is_empty() {
            return Err(SessionKeyError::Empty);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(SessionKeyError::TooLong);
        }

        let segments: Vec<&str> = raw.split(SEPARATOR).collect();
        for (index, segment) in segments.iter().enumerate() {
            validate_segment(index, segment)?;
        }
        if segments[0] != ROOT_SEGMENT {
            return Err(SessionKeyError::MissingRoot);
        }
        if segments.len() < 3 {
            return Err(SessionKeyError::TooShort);
        }

        let first_marker = segments.iter().position(|s| *s == SUBAGENT_MARKER);
        let (root_segments, depth) = match first_marker {
            None => (segments.len(), 0),
            Some(pos) if pos < 3 => return Err(SessionKeyError::MalformedLineage),
            Some(pos) => {
                let lineage = &segments[pos..];
                if lineage.len() % 2 != 0 {
                    return Err(SessionKeyError::MalformedLineage);
                }
                for pair in lineage.chunks(2) {
                    if pair[0] != SUBAGENT_MARKER || pair[1] == SUBAGENT_MARKER {
                        return Err(SessionKeyError::MalformedLineage);
                    }
                }
                let depth = u32::try_from(lineage.len() / 2)
                    .map_err(|_| SessionKeyError::TooLong)?;
                (pos, depth)
            }
        };

        let root_len = segments[..root_segments].iter().map(|s| s.len()).sum::<usize>()
            + root_segments
            - 1;

        Ok(Self {
            raw: raw.to_owned(),
            root_len,
            depth,
        })
    }

    /// Build a root key `agent:<agent_id>:<suffix>`.
    pub fn root(agent_id: &str, suffix: &str) -> Result<Self, SessionKeyError> {
        Self::parse(&format!("{ROOT_SEGMENT}{SEPARATOR}{agent_id}{SEPARATOR}{suffix}"))
    }

    /// Build a fresh root key for an agent with a UUID v7 suffix.
    #[must_use]
    pub fn new_root(agent_id: &str) -> Option<Self> {
        Self::root(agent_id, &Uuid::now_v7().simple().to_string()).ok()
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The agent ID (second segment).
    #[must_use]
    pub fn agent_id(&self) -> &str {
        self.raw.split(SEPARATOR).nth(1).unwrap_or_default()
    }

    /// The root portion of the key, without any subagent lineage.
    #[must_use]
    pub fn root_portion(&self) -> &str {
        &self.raw[..self.root_len]
    }

    /// Number of `subagent:<id>` generations below the root.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether this key identifies a spawned subagent run.
    #[must_use]
    pub fn is_subagent(&self) -> bool {
        self.depth > 0
    }

    /// Number of `:`-separated segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.raw.split(SEPARATOR).count()
    }

    /// The parent key, or `None` for a root key.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.depth == 0 {
            return None;
        }
        let child_sep = self.raw.rfind(SEPARATOR)?;
        let marker_sep = self.raw[..child_sep].rfind(SEPARATOR)?;
        let raw = self.raw[..marker_sep].to_owned();
        Some(Self {
            root_len: self.root_len.min(raw.len()),
            raw,
            depth: self.depth - 1,
        })
    }

    /// The key of a direct child with the given child ID.
    pub fn child(&self, child_id: &str) -> Result<Self, SessionKeyError> {
        Self::parse(&format!(
            "{}{SEPARATOR}{SUBAGENT_MARKER}{SEPARATOR}{child_id}",
            self.raw
        ))
    }

    /// The key of a new direct child with a fresh UUID v7 child ID.
    #[must_use]
    pub fn spawn_child(&self) -> Option<Self> {
        self.child(&Uuid::now_v7().simple().to_string()).ok()
    }

    /// Whether `self` is a strict ancestor of `other`.
    ///
    /// Matches on segment boundaries only and requires the remainder to
    /// start with a subagent marker.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &SessionKey) -> bool {
        other.depth > self.depth
            && other
                .raw
                .strip_prefix(self.raw.as_str())
                .and_then(|rest| rest.strip_prefix(SEPARATOR))
                .is_some_and(|rest| {
                    rest.split(SEPARATOR).next() == Some(SUBAGENT_MARKER)
                })
    }

    /// Whether `self` equals `other` or is one of its ancestors.
    #[must_use]
    pub fn is_self_or_ancestor_of(&self, other: &SessionKey) -> bool {
        self == other || self.is_ancestor_of(other)
    }
}

fn validate_segment(index: usize, segment: &str) -> Result<(), SessionKeyError> {
    if segment.is_empty() {
        return Err(SessionKeyError::InvalidSegment {
            index,
            reason: "segment is empty",
        });
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(SessionKeyError::InvalidSegment {
            index,
            reason: "segment is too long",
        });
    }
    if !segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err(SessionKeyError::InvalidSegment {
            index,
            reason: "only ASCII letters, digits, '-', '_' and '.' are allowed",
        });
    }
    Ok(())
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SessionKey {
    type Err = SessionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = SessionKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for SessionKey {
    type Error = SessionKeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.raw
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
