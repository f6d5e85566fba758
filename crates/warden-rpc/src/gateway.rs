//! In-process gateway client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use warden_runtime::{GatewayClient, GatewayError};

use crate::context::RpcContext;
use crate::registry::MethodRegistry;
use crate::types::RpcRequest;

/// [`GatewayClient`] that answers by dispatching into a method registry
/// bound to another control plane.
pub struct LocalGateway {
    registry: Arc<MethodRegistry>,
    ctx: Arc<RpcContext>,
    next_id: AtomicU64,
}

impl LocalGateway {
    /// Gateway into `registry` with `ctx`.
    pub fn new(registry: Arc<MethodRegistry>, ctx: Arc<RpcContext>) -> Self {
        Self {
            registry,
            ctx,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl GatewayClient for LocalGateway {
    async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let id = format!("gw-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let response = self
            .registry
            .dispatch(RpcRequest::new(id, method, Some(params)), &self.ctx)
            .await;

        if response.success {
            return Ok(response.result.unwrap_or(Value::Null));
        }
        let (code, message) = response
            .error
            .map_or_else(|| ("UNKNOWN".to_owned(), String::new()), |e| (e.code, e.message));
        Err(GatewayError::Rejected {
            method: method.to_owned(),
            code,
            message,
        })
    }
}
