//! Agent handlers: abort.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, instrument};
use warden_core::RunId;
use warden_runtime::terminator::KILL_REASON;

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::require_string_param;
use crate::registry::MethodHandler;

/// Abort a run hosted in this process, addressed by run ID.
///
/// Unknown, ended, or remote runs answer `{ "aborted": false }`; aborting
/// twice is not an error.
pub struct AbortHandler;

#[async_trait]
impl MethodHandler for AbortHandler {
    #[instrument(skip(self, ctx, params), fields(method = "agent.abort"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let run_id = RunId::from(require_string_param(params.as_ref(), "runId")?);
        let reason = params
            .as_ref()
            .and_then(|p| p.get("reason"))
            .and_then(Value::as_str)
            .unwrap_or(KILL_REASON);

        let aborted = ctx.control_plane.abort_run_id(&run_id, reason);
        if aborted {
            info!(run_id = %run_id, reason, "run aborted by request");
        }
        Ok(json!({ "aborted": aborted }))
    }
}
