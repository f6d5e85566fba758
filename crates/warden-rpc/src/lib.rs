//! # warden-rpc
//!
//! Request/response method layer over the control plane.
//!
//! - **Registry**: name → handler map with a per-call timeout and request
//!   metrics
//! - **Handlers**: `system.*`, `agent.abort`, `sessions.*`, `grants.*`,
//!   `limiter.*`, `reaper.sweep`
//! - **Gateway**: [`LocalGateway`], a [`warden_runtime::GatewayClient`] that
//!   dispatches into a registry, so one control plane can abort runs hosted by
//!   another

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod registry;
pub mod types;

pub use context::RpcContext;
pub use errors::RpcError;
pub use gateway::LocalGateway;
pub use handlers::register_all;
pub use registry::{MethodHandler, MethodRegistry};
pub use types::{RpcErrorBody, RpcRequest, RpcResponse};
