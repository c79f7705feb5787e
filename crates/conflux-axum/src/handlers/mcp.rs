//! JSON-RPC endpoint.
//!
//! Every answered request gets HTTP 200 with a JSON-RPC envelope, errors
//! included. Notifications get 202 with no body.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use conflux_core::codes;
use conflux_core::ports::RpcError;
use conflux_gateway::{JsonRpcRequest, JsonRpcResponse};

use super::authorization;
use crate::state::AppState;

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Response {
    let error = RpcError {
        code,
        message: message.into(),
        data: None,
    };
    Json(JsonRpcResponse::error(id, error)).into_response()
}

/// Handle one JSON-RPC message.
pub async fn rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return rpc_error(Value::Null, codes::PARSE_ERROR, format!("Parse error: {e}")),
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return rpc_error(id, codes::INVALID_REQUEST, format!("Invalid request: {e}"));
        }
    };

    match state.gateway.handle(request, authorization(&headers)).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
