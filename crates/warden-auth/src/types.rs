//! Grant data model and consumption results.

use std::fmt;

use serde::{Deserialize, Serialize};
use warden_core::SessionKey;

/// Privileged operation kinds a grant can authorize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantAction {
    /// Terminate another session's run.
    SessionsKill,
    /// Spawn a run on behalf of another session.
    SessionsSpawn,
    /// Send a message into another session.
    SessionsSend,
    /// Execute with elevated permissions.
    ExecElevated,
    /// Modify runtime configuration.
    ConfigPatch,
    /// Wildcard that matches every other action.
    HighRiskRelay,
}

impl GrantAction {
    /// Snake-case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionsKill => "sessions_kill",
            Self::SessionsSpawn => "sessions_spawn",
            Self::SessionsSend => "sessions_send",
            Self::ExecElevated => "exec_elevated",
            Self::ConfigPatch => "config_patch",
            Self::HighRiskRelay => "high_risk_relay",
        }
    }

    /// Whether a grant for `self` may be used for `required`.
    ///
    /// Exact match, or either side is [`GrantAction::HighRiskRelay`].
    #[must_use]
    pub fn is_compatible_with(self, required: GrantAction) -> bool {
        self == required || self == Self::HighRiskRelay || required == Self::HighRiskRelay
    }
}

impl fmt::Display for GrantAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust classification of whoever triggered issuance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceKind {
    /// A human operator.
    Operator,
    /// A root agent run.
    Agent,
    /// A spawned subagent run.
    Subagent,
    /// An inbound message from an external channel.
    ExternalChannel,
    /// The system itself (timers, maintenance).
    System,
}

impl ProvenanceKind {
    /// Snake-case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Agent => "agent",
            Self::Subagent => "subagent",
            Self::ExternalChannel => "external_channel",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ProvenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability token authorizing one privileged action once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationGrant {
    /// Opaque, unguessable token.
    pub token: String,
    /// The authorized action.
    pub action: GrantAction,
    /// Session that requested issuance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_session_key: Option<SessionKey>,
    /// Trust class of the issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_provenance_kind: Option<ProvenanceKind>,
    /// Optional scoping to a specific target session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_session_key: Option<SessionKey>,
    /// Issue time (ms since epoch).
    pub issued_at_ms: u64,
    /// Expiry time (ms since epoch).
    pub expires_at_ms: u64,
    /// First successful consumption time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at_ms: Option<u64>,
    /// Session that consumed the grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_by_session_key: Option<SessionKey>,
}

impl AuthorizationGrant {
    /// Whether the grant has been used.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at_ms.is_some()
    }

    /// Whether the grant is expired at `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Parameters for [`crate::GrantStore::issue`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    /// Action to authorize.
    pub action: GrantAction,
    /// Issuing session.
    #[serde(default)]
    pub issuer_session_key: Option<SessionKey>,
    /// Issuer trust class.
    #[serde(default)]
    pub issuer_provenance_kind: Option<ProvenanceKind>,
    /// Restrict consumption to this target.
    #[serde(default)]
    pub target_session_key: Option<SessionKey>,
    /// Requested lifetime; clamped to 30..=600, default applies when absent
    /// or non-finite.
    #[serde(default)]
    pub ttl_seconds: Option<f64>,
}

impl IssueRequest {
    /// Request for `action` with every optional field unset.
    #[must_use]
    pub fn new(action: GrantAction) -> Self {
        Self {
            action,
            issuer_session_key: None,
            issuer_provenance_kind: None,
            target_session_key: None,
            ttl_seconds: None,
        }
    }
}

/// Parameters for [`crate::GrantStore::consume`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    /// Token presented by the caller.
    pub token: String,
    /// Action the caller is about to perform.
    #[serde(default)]
    pub required_action: Option<GrantAction>,
    /// Session presenting the token.
    #[serde(default)]
    pub requester_session_key: Option<SessionKey>,
    /// Session the action targets.
    #[serde(default)]
    pub target_session_key: Option<SessionKey>,
    /// Required issuer trust class.
    #[serde(default)]
    pub required_provenance_kind: Option<ProvenanceKind>,
}

impl ConsumeRequest {
    /// Request presenting `token` with no further requirements.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            required_action: None,
            requester_session_key: None,
            target_session_key: None,
            required_provenance_kind: None,
        }
    }
}

/// Outcome taxonomy of a consumption attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Consumed successfully.
    Ok,
    /// No grant with that token.
    Missing,
    /// The grant expired and was deleted.
    Expired,
    /// The grant was already used.
    Consumed,
    /// Presented by a session other than the issuer.
    IssuerMismatch,
    /// Scoped to a different target.
    TargetMismatch,
    /// Authorizes a different action.
    ActionMismatch,
    /// Issuer trust class does not match the requirement.
    ProvenanceMismatch,
}

impl GrantStatus {
    /// Snake-case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::Consumed => "consumed",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::TargetMismatch => "target_mismatch",
            Self::ActionMismatch => "action_mismatch",
            Self::ProvenanceMismatch => "provenance_mismatch",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`crate::GrantStore::consume`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeOutcome {
    /// Whether the caller may proceed.
    pub ok: bool,
    /// Outcome status.
    pub status: GrantStatus,
    /// Actionable failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The consumed grant on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<AuthorizationGrant>,
}

impl ConsumeOutcome {
    pub(crate) fn success(grant: AuthorizationGrant) -> Self {
        Self {
            ok: true,
            status: GrantStatus::Ok,
            error: None,
            grant: Some(grant),
        }
    }

    pub(crate) fn rejected(status: GrantStatus, message: String) -> Self {
        Self {
            ok: false,
            status,
            error: Some(message),
            grant: None,
        }
    }
}
