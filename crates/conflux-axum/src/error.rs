//! Axum-specific error types and mappings.
//!
//! Management endpoints map service errors to HTTP status codes here.
//! The `/mcp` endpoint never uses this type: JSON-RPC failures travel
//! inside a 200 response envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use conflux_core::ports::{GatewayError, StoreError};
use conflux_gateway::{HookAdminError, RegistryError, WorkflowError};

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A backend failed or did not answer.
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    /// Stable error type discriminant for client-side handling
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
            error_type: None,
            metadata: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Gateway errors that reach a management endpoint keep their JSON-RPC
/// shape in the body.
pub struct GatewayHttpError(pub GatewayError);

impl IntoResponse for GatewayHttpError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            GatewayError::InvalidRequest(_)
            | GatewayError::InvalidParams(_)
            | GatewayError::MethodNotFound(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) | GatewayError::HookBlocked { .. } => StatusCode::FORBIDDEN,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let rpc = err.to_rpc_error();

        let body = ErrorBody {
            error: rpc.message,
            status: status.as_u16(),
            error_type: Some(err.kind().to_string()),
            metadata: Some(serde_json::json!({ "code": rpc.code, "data": rpc.data })),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<GatewayError> for GatewayHttpError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<RegistryError> for HttpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::NotFound(format!("Backend not found: {id}")),
            RegistryError::AlreadyRunning(_) | RegistryError::NotRunning(_) => {
                Self::Conflict(err.to_string())
            }
            RegistryError::Disabled(_) | RegistryError::InvalidConfig(_) => {
                Self::BadRequest(err.to_string())
            }
            RegistryError::StartFailed(msg) => Self::BadGateway(msg),
        }
    }
}

impl From<HookAdminError> for HttpError {
    fn from(err: HookAdminError) -> Self {
        match err {
            HookAdminError::Script(e) => Self::BadRequest(format!("Invalid hook script: {e}")),
            HookAdminError::Store(e) => e.into(),
        }
    }
}

impl From<WorkflowError> for HttpError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Store(e) => e.into(),
            other => Self::BadRequest(other.to_string()),
        }
    }
}
