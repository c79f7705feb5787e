//! Gateway error taxonomy.
//!
//! Gateway-detected failures (routing, auth, hook veto) are raised fresh
//! with one of the variants below. Backend failures travel as
//! [`BackendError`] and are never rewrapped.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::StoreError;

/// JSON-RPC 2.0 and gateway-specific error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const UNAUTHENTICATED: i64 = -32001;
    pub const TIMEOUT: i64 = -32002;
    pub const FORBIDDEN: i64 = -32003;
    pub const HOOK_BLOCKED: i64 = -32010;
}

/// An error reported by a backend (or by the transport to it).
///
/// Carried to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct BackendError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BackendError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// A failure talking to the backend rather than one it reported.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

/// Structured error payload of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Errors surfaced by the gateway to its callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// Unknown capability or server, server not running, malformed URI.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Method params could not be decoded.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Credential missing, unknown or expired.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credential valid but not scoped to the target.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// A pre or post hook vetoed the call.
    #[error("Blocked by hook '{hook}': {reason}")]
    HookBlocked { hook: String, reason: String },

    /// The backend did not answer within the per-call deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Propagated verbatim from the backend.
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn hook_blocked(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HookBlocked {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// JSON-RPC error code.
    pub const fn code(&self) -> i64 {
        match self {
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::Unauthenticated(_) => codes::UNAUTHENTICATED,
            Self::Forbidden(_) => codes::FORBIDDEN,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::HookBlocked { .. } => codes::HOOK_BLOCKED,
            Self::Timeout(_) => codes::TIMEOUT,
            Self::Backend(e) => e.code,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Stable discriminant used in audit entries and logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidParams(_) => "invalid_params",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::MethodNotFound(_) => "method_not_found",
            Self::HookBlocked { .. } => "hook_blocked",
            Self::Timeout(_) => "timeout",
            Self::Backend(_) => "backend_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to the JSON-RPC error payload.
    ///
    /// Backend errors keep their original code, message and data.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Backend(e) => RpcError {
                code: e.code,
                message: e.message.clone(),
                data: e.data.clone(),
            },
            Self::HookBlocked { hook, reason } => RpcError {
                code: self.code(),
                message: self.to_string(),
                data: Some(json!({ "hook": hook, "reason": reason })),
            },
            _ => RpcError {
                code: self.code(),
                message: self.to_string(),
                data: None,
            },
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_passes_through_unchanged() {
        let backend = BackendError {
            code: 42,
            message: "disk full".into(),
            data: Some(json!({"path": "/tmp"})),
        };
        let err = GatewayError::from(backend.clone());
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, 42);
        assert_eq!(rpc.message, "disk full");
        assert_eq!(rpc.data, backend.data);
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_hook_blocked_carries_reason() {
        let err = GatewayError::hook_blocked("no-delete", "deletes disabled");
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, codes::HOOK_BLOCKED);
        assert_eq!(
            rpc.data,
            Some(json!({"hook": "no-delete", "reason": "deletes disabled"}))
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            GatewayError::invalid_request("x").code(),
            codes::INVALID_REQUEST
        );
        assert_eq!(
            GatewayError::Forbidden("x".into()).code(),
            codes::FORBIDDEN
        );
        assert_eq!(
            GatewayError::MethodNotFound("x".into()).code(),
            codes::METHOD_NOT_FOUND
        );
    }
}
