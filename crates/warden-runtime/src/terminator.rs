//! Cascading termination.
//!
//! A kill resolves its target set (optionally the whole subtree, leaf first),
//! checks that a subagent requester only reaches into its own subtree, then
//! aborts each run through the in-process handle or, failing that, through the
//! gateway's `agent.abort` method. Per-key failures are recorded and never stop
//! the scan.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use warden_core::{RunId, SessionKey};

use crate::registry::RunRegistry;

/// Default timeout for one gateway call.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Reason recorded on runs stopped by a kill.
pub const KILL_REASON: &str = "killed by request";

// ─────────────────────────────────────────────────────────────────────────────
// Gateway seam
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of an out-of-process call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// No gateway reachable.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The remote side answered with an error.
    #[error("{method} rejected ({code}): {message}")]
    Rejected {
        /// Method that was called.
        method: String,
        /// Remote error code.
        code: String,
        /// Remote error message.
        message: String,
    },

    /// The call did not complete in time.
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
}

/// Client for the process that hosts runs not owned here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Invoke `method` with `params` and return the result payload.
    async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Per-key kill outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillStatus {
    /// Abort was issued.
    Aborted,
    /// No live run under this key.
    NotFound,
    /// Abort failed.
    Error,
}

/// Which path delivered the abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortVia {
    /// In-process abort handle.
    Embedded,
    /// Out-of-process `agent.abort` call.
    Gateway,
    /// Nothing was attempted.
    None,
}

/// One entry of a kill report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillResult {
    /// Key this entry is about.
    pub session_key: SessionKey,
    /// Run ID, when a live run was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Outcome.
    pub status: KillStatus,
    /// Delivery path.
    pub via: AbortVia,
    /// Failure text for `error` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Roll-up status of a kill call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillOverall {
    /// Every found run was aborted.
    Ok,
    /// At least one entry failed.
    Partial,
    /// Nothing in the kill set was live.
    NotFound,
    /// Requester may not kill this target.
    Forbidden,
}

impl fmt::Display for KillOverall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
        };
        f.write_str(s)
    }
}

/// Result of [`CascadingTerminator::kill`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillReport {
    /// Roll-up status.
    pub status: KillOverall,
    /// Requested target.
    pub target: SessionKey,
    /// Whether descendants were included.
    pub cascade: bool,
    /// Number of `aborted` entries.
    pub aborted: usize,
    /// Number of `not_found` entries.
    pub not_found: usize,
    /// Number of `error` entries.
    pub failed: usize,
    /// Every key in kill order.
    pub results: Vec<KillResult>,
    /// Set when the call was forbidden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KillReport {
    fn forbidden(target: SessionKey, cascade: bool, requester: &SessionKey) -> Self {
        Self {
            status: KillOverall::Forbidden,
            error: Some(format!(
                "{requester} may only kill runs inside its own subtree; {target} is outside it"
            )),
            target,
            cascade,
            aborted: 0,
            not_found: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    fn from_results(target: SessionKey, cascade: bool, results: Vec<KillResult>) -> Self {
        let count = |s: KillStatus| results.iter().filter(|r| r.status == s).count();
        let aborted = count(KillStatus::Aborted);
        let not_found = count(KillStatus::NotFound);
        let failed = count(KillStatus::Error);
        let status = if failed > 0 {
            KillOverall::Partial
        } else if not_found == results.len() {
            KillOverall::NotFound
        } else {
            KillOverall::Ok
        };
        Self {
            status,
            target,
            cascade,
            aborted,
            not_found,
            failed,
            results,
            error: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Terminator
// ─────────────────────────────────────────────────────────────────────────────

/// Computes kill sets and issues aborts.
///
/// Never mutates run records; whoever observes the run's end marks it ended.
pub struct CascadingTerminator {
    registry: Arc<RunRegistry>,
    gateway: OnceLock<Arc<dyn GatewayClient>>,
    call_timeout: Duration,
}

impl CascadingTerminator {
    /// Terminator with no gateway attached.
    #[must_use]
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self {
            registry,
            gateway: OnceLock::new(),
            call_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    /// Override the per-call gateway timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Attach the out-of-process fallback. Only the first call has an effect.
    pub fn set_gateway(&self, gateway: Arc<dyn GatewayClient>) -> bool {
        self.gateway.set(gateway).is_ok()
    }

    /// Kill `target`, and its descendants when `cascade` is set.
    #[instrument(skip_all, fields(target = %target, cascade))]
    pub async fn kill(
        &self,
        target: &SessionKey,
        requester: Option<&SessionKey>,
        cascade: bool,
    ) -> KillReport {
        if let Some(requester) = requester {
            if requester.is_subagent() && !requester.is_self_or_ancestor_of(target) {
                warn!(requester = %requester, target = %target, "kill forbidden");
                return KillReport::forbidden(target.clone(), cascade, requester);
            }
        }

        let mut keys = if cascade {
            self.registry.subtree_leaf_first(target)
        } else {
            Vec::new()
        };
        keys.push(target.clone());

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.kill_one(key).await);
        }

        let report = KillReport::from_results(target.clone(), cascade, results);
        info!(
            status = %report.status,
            aborted = report.aborted,
            not_found = report.not_found,
            failed = report.failed,
            "kill finished"
        );
        report
    }

    async fn kill_one(&self, session_key: SessionKey) -> KillResult {
        let Some(record) = self.registry.get_active(&session_key) else {
            return KillResult {
                session_key,
                run_id: None,
                status: KillStatus::NotFound,
                via: AbortVia::None,
                error: None,
            };
        };
        let run_id = record.run_id;

        if self.registry.abort_local(&session_key, KILL_REASON) {
            return KillResult {
                session_key,
                run_id: Some(run_id),
                status: KillStatus::Aborted,
                via: AbortVia::Embedded,
                error: None,
            };
        }

        let Some(gateway) = self.gateway.get() else {
            return KillResult {
                session_key,
                run_id: Some(run_id),
                status: KillStatus::Error,
                via: AbortVia::None,
                error: Some(
                    "run is not hosted in this process and no gateway is configured".into(),
                ),
            };
        };

        let params = json!({ "runId": run_id.as_str() });
        let call = gateway.call("agent.abort", params);
        let outcome = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.call_timeout)),
        };
        match outcome {
            Ok(_) => KillResult {
                session_key,
                run_id: Some(run_id),
                status: KillStatus::Aborted,
                via: AbortVia::Gateway,
                error: None,
            },
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "gateway abort failed");
                KillResult {
                    session_key,
                    run_id: Some(run_id),
                    status: KillStatus::Error,
                    via: AbortVia::Gateway,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl fmt::Debug for CascadingTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadingTerminator")
            .field("has_gateway", &self.gateway.get().is_some())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}
