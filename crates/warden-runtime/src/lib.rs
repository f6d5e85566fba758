//! # warden-runtime
//!
//! Run governance: who may run, who may spawn, who may kill, and how one
//! run's events are ordered.
//!
//! - **Registry**: hosted and remote runs keyed by session key, with lineage
//!   queries derived from key structure
//! - **Terminator**: leaf-first cascading kills with an ancestor-only rule
//!   and an embedded-then-gateway abort path
//! - **Limiter**: FIFO admission, backoff, and a cascade-failure breaker
//! - **Reaper**: TTL expiry of ended runs and zombie detection on a timer
//! - **Pipeline**: per-run serialized dispatch with max-turn and loop
//!   safeguards
//! - **Control plane**: owns all of the above and exposes the lifecycle

#![deny(unsafe_code)]

pub mod control_plane;
pub mod errors;
pub mod limiter;
pub mod pipeline;
pub mod reaper;
pub mod registry;
pub mod terminator;

pub use control_plane::{ControlPlane, RunHandle};
pub use errors::RuntimeError;
pub use limiter::{LimitError, LimiterConfig, LimiterHealth, ProcessLimiter};
pub use pipeline::{DispatchPath, EventDispatchPipeline, EventHandler, HandlerError, NoopHandler};
pub use reaper::{CleanupTargets, ReaperPolicy, SessionReaper, SessionState, SweepMetrics};
pub use registry::{AbortHandle, RunOutcome, RunRecord, RunRegistry};
pub use terminator::{
    AbortVia, CascadingTerminator, GatewayClient, GatewayError, KillOverall, KillReport, KillResult,
    KillStatus,
};
