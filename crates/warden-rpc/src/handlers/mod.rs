//! RPC handler modules and registration.

pub mod agent;
pub mod grants;
pub mod limiter;
pub mod reaper;
pub mod sessions;
pub mod system;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::RpcError;
use crate::registry::MethodRegistry;

/// Register all RPC handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    // System
    registry.register("system.ping", system::PingHandler);
    registry.register("system.getInfo", system::GetInfoHandler);

    // Agent
    registry.register("agent.abort", agent::AbortHandler);

    // Sessions
    registry.register("sessions.list", sessions::ListSessionsHandler);
    registry.register("sessions.get", sessions::GetSessionHandler);
    registry.register("sessions.kill", sessions::KillHandler);

    // Grants
    registry.register("grants.issue", grants::IssueGrantHandler);
    registry.register("grants.consume", grants::ConsumeGrantHandler);
    registry.register("grants.get", grants::GetGrantHandler);

    // Limiter
    registry.register("limiter.health", limiter::HealthHandler);
    registry.register("limiter.reset", limiter::ResetHandler);

    // Reaper
    registry.register("reaper.sweep", reaper::SweepHandler);
}

/// Deserialize the params object into `T`. Absent params parse as `{}`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let value = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(value)
        .map_err(|e| RpcError::invalid_params(format!("Invalid params: {e}")))
}

/// Extract a required string parameter.
pub(crate) fn require_string_param(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    params
        .and_then(|p| p.get(key))
        .ok_or_else(|| RpcError::invalid_params(format!("Missing required parameter: {key}")))?
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| RpcError::invalid_params(format!("Parameter '{key}' must be a string")))
}

/// Serialize a handler result.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Internal {
        message: e.to_string(),
    })
}
