//! Reaper handler: on-demand sweep.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::to_json;
use crate::registry::MethodHandler;

/// Run one reaper pass now and return what it removed.
pub struct SweepHandler;

#[async_trait]
impl MethodHandler for SweepHandler {
    #[instrument(skip(self, ctx), fields(method = "reaper.sweep"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        to_json(&ctx.control_plane.sweep())
    }
}
