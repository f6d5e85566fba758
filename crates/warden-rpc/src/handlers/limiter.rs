//! Limiter handlers: health, reset.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::to_json;
use crate::registry::MethodHandler;

/// Snapshot of the process limiter.
pub struct HealthHandler;

#[async_trait]
impl MethodHandler for HealthHandler {
    #[instrument(skip(self, ctx), fields(method = "limiter.health"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        to_json(&ctx.control_plane.limiter_health())
    }
}

/// Close the breaker and clear reporting totals.
pub struct ResetHandler;

#[async_trait]
impl MethodHandler for ResetHandler {
    #[instrument(skip(self, ctx), fields(method = "limiter.reset"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        ctx.control_plane.reset_limiter();
        info!("limiter reset by request");
        Ok(json!({ "reset": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::make_test_context;

    #[tokio::test]
    async fn reset_closes_the_breaker() {
        let ctx = make_test_context();
        let limiter = ctx.control_plane.limiter();
        for _ in 0..5 {
            let _ = limiter
                .execute_with_limits(0, || async { Err::<(), _>("spawn failed".to_string()) })
                .await;
        }

        let health = HealthHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(health["consecutiveFailures"], 5);
        assert_eq!(health["circuitOpen"], true);
        assert_eq!(health["lastError"], "spawn failed");
        assert_eq!(health["maxConcurrent"], 4);

        let reset = ResetHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(reset["reset"], true);

        let health = HealthHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(health["consecutiveFailures"], 0);
        assert_eq!(health["circuitOpen"], false);
        assert!(health.get("lastError").is_none());
    }
}
