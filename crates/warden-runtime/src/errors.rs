//! Runtime error types.

use warden_core::SessionKeyError;

/// Errors raised by the control plane.
///
/// Authorization and lookup failures during kills are reported through
/// [`crate::terminator::KillReport`] instead; the only admission error that
/// surfaces here is [`RuntimeError::CascadeThrottled`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A session key failed validation.
    #[error("Invalid session key: {0}")]
    InvalidSessionKey(#[from] SessionKeyError),

    /// A live run already exists under this key.
    #[error("Run already active: {0}")]
    DuplicateRun(String),

    /// Session not found in the registry.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Spawn admission refused the request.
    #[error("Spawn forbidden: {0}")]
    SpawnForbidden(String),

    /// The process limiter's circuit breaker is open.
    #[error(
        "Cascade failure detected: {failures} consecutive failures (threshold {threshold}); stop spawning and investigate"
    )]
    CascadeThrottled {
        /// Consecutive failures observed.
        failures: u32,
        /// Threshold that tripped the breaker.
        threshold: u32,
    },

    /// The run was aborted before it finished.
    #[error("Run aborted: {0}")]
    Aborted(String),

    /// The run's task returned an error.
    #[error("Task failed: {0}")]
    Task(String),

    /// Internal / unexpected error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether the caller may reasonably retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Aborted(_) | Self::Task(_) | Self::SpawnForbidden(_) => true,
            Self::InvalidSessionKey(_)
            | Self::DuplicateRun(_)
            | Self::SessionNotFound(_)
            | Self::CascadeThrottled { .. }
            | Self::Internal(_) => false,
        }
    }

    /// Error category string for logs and RPC error details.
    pub fn category(&self) -> &str {
        match self {
            Self::InvalidSessionKey(_) => "invalid_session_key",
            Self::DuplicateRun(_) => "duplicate_run",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SpawnForbidden(_) => "spawn_forbidden",
            Self::CascadeThrottled { .. } => "cascade_throttled",
            Self::Aborted(_) => "aborted",
            Self::Task(_) => "task",
            Self::Internal(_) => "internal",
        }
    }
}
