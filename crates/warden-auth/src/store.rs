//! In-memory grant store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};
use warden_core::Clock;

use crate::token::generate_token;
use crate::types::{
    AuthorizationGrant, ConsumeOutcome, ConsumeRequest, GrantStatus, IssueRequest,
};

/// Shortest lifetime a grant may have.
pub const MIN_TTL_SECONDS: f64 = 30.0;
/// Longest lifetime a grant may have.
pub const MAX_TTL_SECONDS: f64 = 600.0;
/// Lifetime used when the request carries none.
pub const DEFAULT_TTL_SECONDS: f64 = 120.0;

/// Clamp a requested TTL into `[MIN_TTL_SECONDS, MAX_TTL_SECONDS]`.
///
/// Absent or non-finite requests fall back to `default_seconds` (itself
/// clamped, and replaced by [`DEFAULT_TTL_SECONDS`] when non-finite).
#[must_use]
pub fn clamp_ttl_seconds(requested: Option<f64>, default_seconds: f64) -> f64 {
    let default_seconds = if default_seconds.is_finite() {
        default_seconds
    } else {
        DEFAULT_TTL_SECONDS
    };
    requested
        .filter(|v| v.is_finite())
        .unwrap_or(default_seconds)
        .clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS)
}

/// Issues and consumes single-use grants.
#[derive(Debug)]
pub struct GrantStore {
    grants: Mutex<HashMap<String, AuthorizationGrant>>,
    default_ttl_seconds: f64,
    clock: Arc<dyn Clock>,
}

impl GrantStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(default_ttl_seconds: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            default_ttl_seconds: clamp_ttl_seconds(None, default_ttl_seconds),
            clock,
        }
    }

    /// Mint a new grant.
    #[instrument(skip(self, request), fields(action = %request.action))]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn issue(&self, request: IssueRequest) -> AuthorizationGrant {
        let now = self.clock.now_ms();
        let ttl_seconds = clamp_ttl_seconds(request.ttl_seconds, self.default_ttl_seconds);
        let ttl_ms = (ttl_seconds * 1000.0).round() as u64;

        let grant = AuthorizationGrant {
            token: generate_token(),
            action: request.action,
            issuer_session_key: request.issuer_session_key,
            issuer_provenance_kind: request.issuer_provenance_kind,
            target_session_key: request.target_session_key,
            issued_at_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms),
            consumed_at_ms: None,
            consumed_by_session_key: None,
        };

        let mut grants = self.grants.lock();
        let pruned = prune_expired(&mut grants, now);
        let _ = grants.insert(grant.token.clone(), grant.clone());
        drop(grants);

        debug!(ttl_ms, pruned, "authorization grant issued");
        metrics::counter!("warden_grants_issued_total", "action" => grant.action.as_str())
            .increment(1);
        grant
    }

    /// Validate `request.token` and mark it consumed on success.
    ///
    /// Checks run in order and stop at the first failure: existence,
    /// expiry, single use, issuer, target, action, provenance.
    #[instrument(skip(self, request))]
    pub fn consume(&self, request: &ConsumeRequest) -> ConsumeOutcome {
        let now = self.clock.now_ms();
        let mut grants = self.grants.lock();
        let outcome = evaluate(&mut grants, request, now);
        let _ = prune_expired(&mut grants, now);
        drop(grants);

        metrics::counter!("warden_grants_consumed_total", "status" => outcome.status.as_str())
            .increment(1);
        if outcome.ok {
            debug!("authorization grant consumed");
        } else {
            info!(status = %outcome.status, "authorization grant rejected");
        }
        outcome
    }

    /// Look up a grant without consuming it (audit).
    pub fn get(&self, token: &str) -> Option<AuthorizationGrant> {
        self.grants.lock().get(token).cloned()
    }

    /// Remove expired grants now; returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now_ms();
        prune_expired(&mut self.grants.lock(), now)
    }

    /// Number of stored grants, consumed ones included.
    pub fn len(&self) -> usize {
        self.grants.lock().len()
    }

    /// Whether the store holds no grants.
    pub fn is_empty(&self) -> bool {
        self.grants.lock().is_empty()
    }
}

fn prune_expired(grants: &mut HashMap<String, AuthorizationGrant>, now: u64) -> usize {
    let before = grants.len();
    grants.retain(|_, g| !g.is_expired_at(now));
    before - grants.len()
}

fn evaluate(
    grants: &mut HashMap<String, AuthorizationGrant>,
    request: &ConsumeRequest,
    now: u64,
) -> ConsumeOutcome {
    let Some(grant) = grants.get_mut(&request.token) else {
        return ConsumeOutcome::rejected(
            GrantStatus::Missing,
            "authorization grant not found; issue a fresh grant and retry".into(),
        );
    };

    if grant.is_expired_at(now) {
        let _ = grants.remove(&request.token);
        return ConsumeOutcome::rejected(
            GrantStatus::Expired,
            "authorization grant expired; issue a fresh grant and retry".into(),
        );
    }

    if grant.is_consumed() {
        return ConsumeOutcome::rejected(
            GrantStatus::Consumed,
            "authorization grant was already used; issue a fresh grant and retry".into(),
        );
    }

    if let (Some(requester), Some(issuer)) =
        (&request.requester_session_key, &grant.issuer_session_key)
    {
        if requester != issuer {
            return ConsumeOutcome::rejected(
                GrantStatus::IssuerMismatch,
                format!(
                    "authorization grant was issued by {issuer}, not {requester}; issue a fresh grant from this session and retry"
                ),
            );
        }
    }

    if let (Some(wanted), Some(scoped)) = (&request.target_session_key, &grant.target_session_key) {
        if wanted != scoped {
            return ConsumeOutcome::rejected(
                GrantStatus::TargetMismatch,
                format!(
                    "authorization grant is scoped to {scoped}, not {wanted}; issue a fresh grant for {wanted} and retry"
                ),
            );
        }
    }

    if let Some(required) = request.required_action {
        if !grant.action.is_compatible_with(required) {
            return ConsumeOutcome::rejected(
                GrantStatus::ActionMismatch,
                format!(
                    "authorization grant covers {}, not {required}; issue a fresh grant for {required} and retry",
                    grant.action
                ),
            );
        }
    }

    if let (Some(required), Some(actual)) =
        (request.required_provenance_kind, grant.issuer_provenance_kind)
    {
        if required != actual {
            return ConsumeOutcome::rejected(
                GrantStatus::ProvenanceMismatch,
                format!(
                    "authorization grant was issued with provenance {actual}, but {required} is required; issue a fresh grant and retry"
                ),
            );
        }
    }

    grant.consumed_at_ms = Some(now);
    grant.consumed_by_session_key.clone_from(&request.requester_session_key);
    ConsumeOutcome::success(grant.clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use warden_core::{ManualClock, SessionKey};

    use super::*;
    use crate::types::{GrantAction, ProvenanceKind};

    const T0: u64 = 1_700_000_000_000;

    fn store() -> (GrantStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        (GrantStore::new(DEFAULT_TTL_SECONDS, clock.clone()), clock)
    }

    fn key(s: &str) -> SessionKey {
        SessionKey::parse(s).unwrap()
    }

    #[test]
    fn ttl_clamping() {
        assert!((clamp_ttl_seconds(None, 120.0) - 120.0).abs() < f64::EPSILON);
        assert!((clamp_ttl_seconds(Some(10_000.0), 120.0) - 600.0).abs() < f64::EPSILON);
        assert!((clamp_ttl_seconds(Some(1.0), 120.0) - 30.0).abs() < f64::EPSILON);
        assert!((clamp_ttl_seconds(Some(f64::NAN), 120.0) - 120.0).abs() < f64::EPSILON);
        assert!((clamp_ttl_seconds(Some(f64::INFINITY), 120.0) - 120.0).abs() < f64::EPSILON);
        assert!((clamp_ttl_seconds(None, f64::NAN) - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn issue_uses_default_ttl() {
        let (store, _) = store();
        let grant = store.issue(IssueRequest::new(GrantAction::SessionsKill));
        assert_eq!(grant.issued_at_ms, T0);
        assert_eq!(grant.expires_at_ms - grant.issued_at_ms, 120_000);
        assert!(!grant.is_consumed());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn oversized_ttl_clamped_then_expires() {
        let (store, clock) = store();
        let mut request = IssueRequest::new(GrantAction::SessionsKill);
        request.ttl_seconds = Some(10_000.0);
        let grant = store.issue(request);
        assert_eq!(grant.expires_at_ms - grant.issued_at_ms, 600_000);

        clock.advance(Duration::from_secs(601));
        let outcome = store.consume(&ConsumeRequest::new(&grant.token));
        assert_eq!(outcome.status, GrantStatus::Expired);
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("issue a fresh grant"));

        let again = store.consume(&ConsumeRequest::new(&grant.token));
        assert!(!again.ok);
        assert_eq!(again.status, GrantStatus::Missing);
        assert!(store.get(&grant.token).is_none());
    }

    #[test]
    fn expiry_is_inclusive() {
        let (store, clock) = store();
        let grant = store.issue(IssueRequest::new(GrantAction::SessionsKill));
        clock.set(grant.expires_at_ms);
        assert_eq!(
            store.consume(&ConsumeRequest::new(&grant.token)).status,
            GrantStatus::Expired
        );
    }

    #[test]
    fn single_use() {
        let (store, _) = store();
        let grant = store.issue(IssueRequest::new(GrantAction::SessionsKill));

        let mut request = ConsumeRequest::new(&grant.token);
        request.requester_session_key = Some(key("agent:main:main"));
        let first = store.consume(&request);
        assert!(first.ok);
        assert_eq!(first.status, GrantStatus::Ok);
        let consumed = first.grant.unwrap();
        assert_eq!(consumed.consumed_at_ms, Some(T0));
        assert_eq!(consumed.consumed_by_session_key, Some(key("agent:main:main")));

        let second = store.consume(&request);
        assert!(!second.ok);
        assert_eq!(second.status, GrantStatus::Consumed);

        // Still retrievable for audit.
        assert!(store.get(&grant.token).unwrap().is_consumed());
    }

    #[test]
    fn missing_token() {
        let (store, _) = store();
        let outcome = store.consume(&ConsumeRequest::new("nope"));
        assert_eq!(outcome.status, GrantStatus::Missing);
        assert!(outcome.grant.is_none());
    }

    #[test]
    fn issuer_mismatch_only_when_both_specified() {
        let (store, _) = store();
        let mut issue = IssueRequest::new(GrantAction::SessionsKill);
        issue.issuer_session_key = Some(key("agent:main:main"));
        let grant = store.issue(issue.clone());

        let mut request = ConsumeRequest::new(&grant.token);
        request.requester_session_key = Some(key("agent:other:main"));
        assert_eq!(store.consume(&request).status, GrantStatus::IssuerMismatch);

        // Requester unspecified: no issuer check.
        let grant = store.issue(issue);
        assert!(store.consume(&ConsumeRequest::new(&grant.token)).ok);
    }

    #[test]
    fn target_mismatch() {
        let (store, _) = store();
        let mut issue = IssueRequest::new(GrantAction::SessionsKill);
        issue.target_session_key = Some(key("agent:main:main:subagent:a"));
        let grant = store.issue(issue);

        let mut request = ConsumeRequest::new(&grant.token);
        request.target_session_key = Some(key("agent:main:main:subagent:b"));
        let outcome = store.consume(&request);
        assert_eq!(outcome.status, GrantStatus::TargetMismatch);
        // A failed check leaves the grant usable.
        request.target_session_key = Some(key("agent:main:main:subagent:a"));
        assert!(store.consume(&request).ok);
    }

    #[test]
    fn action_compatibility() {
        let (store, _) = store();

        let grant = store.issue(IssueRequest::new(GrantAction::SessionsSend));
        let mut request = ConsumeRequest::new(&grant.token);
        request.required_action = Some(GrantAction::SessionsKill);
        assert_eq!(store.consume(&request).status, GrantStatus::ActionMismatch);

        let relay = store.issue(IssueRequest::new(GrantAction::HighRiskRelay));
        let mut request = ConsumeRequest::new(&relay.token);
        request.required_action = Some(GrantAction::ConfigPatch);
        assert!(store.consume(&request).ok);

        let exec = store.issue(IssueRequest::new(GrantAction::ExecElevated));
        let mut request = ConsumeRequest::new(&exec.token);
        request.required_action = Some(GrantAction::HighRiskRelay);
        assert!(store.consume(&request).ok);
    }

    #[test]
    fn provenance_mismatch() {
        let (store, _) = store();
        let mut issue = IssueRequest::new(GrantAction::SessionsKill);
        issue.issuer_provenance_kind = Some(ProvenanceKind::ExternalChannel);
        let grant = store.issue(issue);

        let mut request = ConsumeRequest::new(&grant.token);
        request.required_provenance_kind = Some(ProvenanceKind::Operator);
        assert_eq!(store.consume(&request).status, GrantStatus::ProvenanceMismatch);
    }

    #[test]
    fn checks_run_in_order() {
        let (store, _) = store();
        let mut issue = IssueRequest::new(GrantAction::SessionsSend);
        issue.issuer_session_key = Some(key("agent:main:main"));
        issue.target_session_key = Some(key("agent:main:main:subagent:a"));
        let grant = store.issue(issue);

        // Issuer, target, and action all mismatch; issuer is reported.
        let mut request = ConsumeRequest::new(&grant.token);
        request.requester_session_key = Some(key("agent:x:y"));
        request.target_session_key = Some(key("agent:main:main:subagent:b"));
        request.required_action = Some(GrantAction::SessionsKill);
        assert_eq!(store.consume(&request).status, GrantStatus::IssuerMismatch);
    }

    #[test]
    fn issue_prunes_expired() {
        let (store, clock) = store();
        let old = store.issue(IssueRequest::new(GrantAction::SessionsKill));
        clock.advance(Duration::from_secs(121));
        let _fresh = store.issue(IssueRequest::new(GrantAction::SessionsKill));
        assert!(store.get(&old.token).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn consume_prunes_other_expired() {
        let (store, clock) = store();
        let short = store.issue(IssueRequest::new(GrantAction::SessionsKill));
        let mut long = IssueRequest::new(GrantAction::SessionsKill);
        long.ttl_seconds = Some(600.0);
        let long = store.issue(long);

        clock.advance(Duration::from_secs(200));
        assert!(store.consume(&ConsumeRequest::new(&long.token)).ok);
        assert!(store.get(&short.token).is_none());
        assert_matches!(store.get(&long.token), Some(g) if g.is_consumed());
    }

    #[test]
    fn manual_prune() {
        let (store, clock) = store();
        let _ = store.issue(IssueRequest::new(GrantAction::SessionsKill));
        let _ = store.issue(IssueRequest::new(GrantAction::SessionsKill));
        assert_eq!(store.prune(), 0);
        clock.advance(Duration::from_secs(120));
        assert_eq!(store.prune(), 2);
        assert!(store.is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn clamped_ttl_always_in_bounds(ttl in proptest::num::f64::ANY) {
                let v = clamp_ttl_seconds(Some(ttl), DEFAULT_TTL_SECONDS);
                prop_assert!((MIN_TTL_SECONDS..=MAX_TTL_SECONDS).contains(&v));
            }

            #[test]
            fn second_consume_never_ok(advance_secs in 0_u64..120) {
                let (store, clock) = store();
                let grant = store.issue(IssueRequest::new(GrantAction::SessionsKill));
                let request = ConsumeRequest::new(&grant.token);
                prop_assert!(store.consume(&request).ok);
                clock.advance(Duration::from_secs(advance_secs));
                let second = store.consume(&request);
                prop_assert!(!second.ok);
                prop_assert_ne!(second.status, GrantStatus::Ok);
            }
        }
    }
}
