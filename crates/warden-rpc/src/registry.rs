//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::context::RpcContext;
use crate::errors::{self, RpcError};
use crate::types::{RpcRequest, RpcResponse};

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    timeout: Duration,
}

impl MethodRegistry {
    /// Maximum time a single handler is allowed to run.
    pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            timeout: Self::HANDLER_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a handler for a method name, replacing any previous one.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Dispatch a request to the appropriate handler.
    pub async fn dispatch(&self, request: RpcRequest, ctx: &RpcContext) -> RpcResponse {
        let RpcRequest { id, method, params } = request;
        counter!("warden_rpc_requests_total", "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            counter!(
                "warden_rpc_errors_total",
                "method" => method.clone(),
                "error_type" => "method_not_found"
            )
            .increment(1);
            let message = format!("Method '{method}' not found");
            return RpcResponse::error(id, errors::METHOD_NOT_FOUND, message);
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, handler.handle(params, ctx)).await;

        let response = match result {
            Ok(Ok(value)) => RpcResponse::success(id, value),
            Ok(Err(err)) => {
                counter!(
                    "warden_rpc_errors_total",
                    "method" => method.clone(),
                    "error_type" => err.code().to_owned()
                )
                .increment(1);
                debug!(method, code = err.code(), error = %err, "handler returned error");
                RpcResponse::failure(id, err.to_error_body())
            }
            Err(_elapsed) => {
                counter!(
                    "warden_rpc_errors_total",
                    "method" => method.clone(),
                    "error_type" => "timeout"
                )
                .increment(1);
                error!(method, "RPC handler timed out after {:?}", self.timeout);
                let message = format!("Handler for '{method}' timed out");
                RpcResponse::error(id, errors::INTERNAL_ERROR, message)
            }
        };

        let duration = start.elapsed();
        if duration.as_secs() >= 5 {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        response
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
