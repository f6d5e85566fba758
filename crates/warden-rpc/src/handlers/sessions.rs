//! Session handlers: list, get, kill.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};
use warden_auth::{ConsumeRequest, GrantAction};
use warden_core::SessionKey;

use crate::context::RpcContext;
use crate::errors::{self, RpcError};
use crate::handlers::{parse_params, to_json};
use crate::registry::MethodHandler;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    active_only: bool,
}

/// List tracked runs, sorted by session key.
pub struct ListSessionsHandler;

#[async_trait]
impl MethodHandler for ListSessionsHandler {
    #[instrument(skip(self, ctx, params), fields(method = "sessions.list"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: ListParams = parse_params(params)?;
        let mut runs = ctx.control_plane.list_runs();
        if p.active_only {
            runs.retain(|r| r.is_active());
        }
        Ok(json!({
            "count": runs.len(),
            "sessions": to_json(&runs)?,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetParams {
    session_key: SessionKey,
}

/// Fetch one run record.
pub struct GetSessionHandler;

#[async_trait]
impl MethodHandler for GetSessionHandler {
    #[instrument(skip(self, ctx, params), fields(method = "sessions.get"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: GetParams = parse_params(params)?;
        let record = ctx
            .control_plane
            .get_run(&p.session_key)
            .ok_or_else(|| RpcError::NotFound {
                code: errors::SESSION_NOT_FOUND.into(),
                message: format!("Session not found: {}", p.session_key),
            })?;
        to_json(&record)
    }
}

fn default_cascade() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KillParams {
    session_key: SessionKey,
    #[serde(default = "default_cascade")]
    cascade: bool,
    #[serde(default)]
    requester_session_key: Option<SessionKey>,
    #[serde(default)]
    grant_token: Option<String>,
}

/// Kill a run, and by default its whole subtree.
///
/// A presented `grantToken` is consumed for `sessions_kill` against the
/// target before anything is aborted; a rejected grant fails the call with
/// `GRANT_REJECTED` and the consumption outcome as details. Forbidden and
/// partial kills are reported in the result, not as errors.
pub struct KillHandler;

#[async_trait]
impl MethodHandler for KillHandler {
    #[instrument(skip(self, ctx, params), fields(method = "sessions.kill"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: KillParams = parse_params(params)?;
        let cp = &ctx.control_plane;

        if let Some(token) = p.grant_token {
            let mut request = ConsumeRequest::new(token);
            request.required_action = Some(GrantAction::SessionsKill);
            request.requester_session_key = p.requester_session_key.clone();
            request.target_session_key = Some(p.session_key.clone());

            let outcome = cp.consume_grant(&request);
            if !outcome.ok {
                warn!(target_key = %p.session_key, status = %outcome.status, "kill grant rejected");
                let message = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("grant rejected: {}", outcome.status));
                return Err(RpcError::Custom {
                    code: errors::GRANT_REJECTED.into(),
                    message,
                    details: Some(to_json(&outcome)?),
                });
            }
        }

        let report = cp
            .kill(&p.session_key, p.requester_session_key.as_ref(), p.cascade)
            .await;
        to_json(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::make_test_context;
    use std::sync::Arc;
    use warden_auth::IssueRequest;
    use warden_runtime::{NoopHandler, RunOutcome};

    #[tokio::test]
    async fn list_filters_active() {
        let ctx = make_test_context();
        let cp = &ctx.control_plane;
        let a = cp.start_root_run("a", Arc::new(NoopHandler)).unwrap();
        let _b = cp.start_root_run("b", Arc::new(NoopHandler)).unwrap();
        assert!(cp.end_run(&a.session_key, RunOutcome::Completed, None));

        let all = ListSessionsHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(all["count"], 2);
        assert_eq!(all["sessions"][0]["sessionKey"], "agent:a:main");

        let live = ListSessionsHandler
            .handle(Some(json!({ "activeOnly": true })), &ctx)
            .await
            .unwrap();
        assert_eq!(live["count"], 1);
        assert_eq!(live["sessions"][0]["sessionKey"], "agent:b:main");
    }

    #[tokio::test]
    async fn get_unknown_session() {
        let ctx = make_test_context();
        let err = GetSessionHandler
            .handle(Some(json!({ "sessionKey": "agent:x:main" })), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), errors::SESSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn get_rejects_malformed_key() {
        let ctx = make_test_context();
        let err = GetSessionHandler
            .handle(Some(json!({ "sessionKey": "not a key" })), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), errors::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn kill_cascades_by_default() {
        let ctx = make_test_context();
        let cp = &ctx.control_plane;
        let root = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
        let child = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();

        let report = KillHandler
            .handle(Some(json!({ "sessionKey": root.session_key.as_str() })), &ctx)
            .await
            .unwrap();
        assert_eq!(report["status"], "ok");
        assert_eq!(report["cascade"], true);
        assert_eq!(report["aborted"], 2);
        assert_eq!(report["notFound"], 0);
        assert_eq!(report["results"][0]["via"], "embedded");
        assert!(child.is_aborted());
    }

    #[tokio::test]
    async fn forbidden_kill_is_a_result_not_an_error() {
        let ctx = make_test_context();
        let cp = &ctx.control_plane;
        let root = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
        let a = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();
        let b = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();

        let report = KillHandler
            .handle(
                Some(json!({
                    "sessionKey": b.session_key.as_str(),
                    "requesterSessionKey": a.session_key.as_str(),
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(report["status"], "forbidden");
        assert!(report["error"].is_string());
        assert!(!b.is_aborted());
    }

    #[tokio::test]
    async fn kill_with_grant_consumes_it_once() {
        let ctx = make_test_context();
        let cp = &ctx.control_plane;
        let run = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
        let mut issue = IssueRequest::new(GrantAction::SessionsKill);
        issue.target_session_key = Some(run.session_key.clone());
        let grant = cp.issue_grant(issue);

        let params = json!({
            "sessionKey": run.session_key.as_str(),
            "grantToken": grant.token,
        });
        let report = KillHandler.handle(Some(params.clone()), &ctx).await.unwrap();
        assert_eq!(report["status"], "ok");

        let err = KillHandler.handle(Some(params), &ctx).await.unwrap_err();
        assert_eq!(err.code(), errors::GRANT_REJECTED);
        let body = err.to_error_body();
        assert_eq!(body.details.unwrap()["status"], "consumed");
    }

    #[tokio::test]
    async fn grant_for_another_target_blocks_the_kill() {
        let ctx = make_test_context();
        let cp = &ctx.control_plane;
        let a = cp.start_root_run("a", Arc::new(NoopHandler)).unwrap();
        let b = cp.start_root_run("b", Arc::new(NoopHandler)).unwrap();
        let mut issue = IssueRequest::new(GrantAction::SessionsKill);
        issue.target_session_key = Some(a.session_key.clone());
        let grant = cp.issue_grant(issue);

        let err = KillHandler
            .handle(
                Some(json!({ "sessionKey": b.session_key.as_str(), "grantToken": grant.token })),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), errors::GRANT_REJECTED);
        assert_eq!(err.to_error_body().details.unwrap()["status"], "target_mismatch");
        assert!(!b.is_aborted());
    }
}
