//! Shared state handed to every handler.

use std::sync::Arc;
use std::time::Instant;

use warden_runtime::ControlPlane;

/// Shared context passed to every RPC handler.
pub struct RpcContext {
    /// The control plane the methods operate on.
    pub control_plane: Arc<ControlPlane>,
    /// When this context was created; reported as uptime.
    pub server_start_time: Instant,
}

impl RpcContext {
    /// Context over `control_plane`, starting the uptime clock now.
    pub fn new(control_plane: Arc<ControlPlane>) -> Self {
        Self {
            control_plane,
            server_start_time: Instant::now(),
        }
    }
}
