//! RPC error codes and error type.

use warden_runtime::RuntimeError;

use crate::types::RpcErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Unparseable request line.
pub const PARSE_ERROR: &str = "PARSE_ERROR";
/// No run for the given session key.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Admission refused a spawn.
pub const SPAWN_FORBIDDEN: &str = "SPAWN_FORBIDDEN";
/// Limiter breaker is open.
pub const CASCADE_THROTTLED: &str = "CASCADE_THROTTLED";
/// A presented grant did not authorize the call.
pub const GRANT_REJECTED: &str = "GRANT_REJECTED";

/// RPC error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Requested resource not found.
    #[error("{message}")]
    NotFound {
        /// Specific error code (e.g. `SESSION_NOT_FOUND`).
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Domain-specific error with arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<serde_json::Value>,
    },
}

impl RpcError {
    /// Shorthand for [`RpcError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::NotFound { code, .. } | Self::Custom { code, .. } => code,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
            details: match self {
                Self::Custom { details, .. } => details.clone(),
                _ => None,
            },
        }
    }
}

impl From<RuntimeError> for RpcError {
    fn from(err: RuntimeError) -> Self {
        let message = err.to_string();
        match err {
            RuntimeError::InvalidSessionKey(_) => Self::InvalidParams { message },
            RuntimeError::SessionNotFound(_) => Self::NotFound {
                code: SESSION_NOT_FOUND.into(),
                message,
            },
            RuntimeError::SpawnForbidden(_) => Self::Custom {
                code: SPAWN_FORBIDDEN.into(),
                message,
                details: None,
            },
            RuntimeError::CascadeThrottled { .. } => Self::Custom {
                code: CASCADE_THROTTLED.into(),
                message,
                details: None,
            },
            _ => Self::Internal { message },
        }
    }
}
