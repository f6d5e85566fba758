//! Grant handlers: issue, consume, get.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use warden_auth::{ConsumeRequest, IssueRequest};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::{parse_params, require_string_param, to_json};
use crate::registry::MethodHandler;

/// Mint a single-use grant.
pub struct IssueGrantHandler;

#[async_trait]
impl MethodHandler for IssueGrantHandler {
    #[instrument(skip(self, ctx, params), fields(method = "grants.issue"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let request: IssueRequest = parse_params(params)?;
        let grant = ctx.control_plane.issue_grant(request);
        debug!(
            action = %grant.action.as_str(),
            expires_at_ms = grant.expires_at_ms,
            "grant issued"
        );
        to_json(&grant)
    }
}

/// Validate and consume a grant. Every outcome, including rejection, is a
/// successful response carrying `{ ok, status, error?, grant? }`.
pub struct ConsumeGrantHandler;

#[async_trait]
impl MethodHandler for ConsumeGrantHandler {
    #[instrument(skip(self, ctx, params), fields(method = "grants.consume"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let request: ConsumeRequest = parse_params(params)?;
        to_json(&ctx.control_plane.consume_grant(&request))
    }
}

/// Audit lookup of a grant by token.
pub struct GetGrantHandler;

#[async_trait]
impl MethodHandler for GetGrantHandler {
    #[instrument(skip(self, ctx, params), fields(method = "grants.get"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let token = require_string_param(params.as_ref(), "token")?;
        match ctx.control_plane.get_grant(&token) {
            Some(grant) => Ok(json!({ "found": true, "grant": to_json(&grant)? })),
            None => Ok(json!({ "found": false })),
        }
    }
}
