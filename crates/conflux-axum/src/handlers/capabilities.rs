//! Aggregated capability handlers.
//!
//! The same view `/mcp` serves, as plain JSON. The caller's bearer
//! credential scopes every listing and call exactly as on `/mcp`.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use conflux_core::{DisplayRule, PromptRecord, ResourceRecord, ToolRecord};
use conflux_gateway::protocol::bearer_token;

use super::authorization;
use crate::error::{GatewayHttpError, HttpError};
use crate::state::AppState;

fn token(headers: &HeaderMap) -> Option<&str> {
    authorization(headers).and_then(bearer_token)
}

#[derive(Debug, Deserialize)]
pub struct NamedCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    pub uri: String,
}

#[derive(Debug, Serialize)]
pub struct ReloadedRules {
    pub count: usize,
}

pub async fn tools(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<ToolRecord>> {
    Json(state.gateway.list_tools(token(&headers)).await)
}

pub async fn prompts(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<PromptRecord>> {
    Json(state.gateway.list_prompts(token(&headers)).await)
}

pub async fn resources(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<Vec<ResourceRecord>> {
    Json(state.gateway.list_resources(token(&headers)).await)
}

pub async fn call_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NamedCall>,
) -> Result<Json<Value>, GatewayHttpError> {
    let result = state
        .gateway
        .call_tool(&req.name, req.arguments, token(&headers))
        .await?;
    Ok(Json(result))
}

pub async fn get_prompt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NamedCall>,
) -> Result<Json<Value>, GatewayHttpError> {
    let result = state
        .gateway
        .get_prompt(&req.name, req.arguments, token(&headers))
        .await?;
    Ok(Json(result))
}

/// Read a `resource://<server>/<path>` URI.
pub async fn read_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReadRequest>,
) -> Result<Json<Value>, GatewayHttpError> {
    let result = state
        .gateway
        .read_resource(&req.uri, token(&headers))
        .await?;
    Ok(Json(result))
}

/// Replace every display rule and apply them to the next listing.
pub async fn set_display_rules(
    State(state): State<AppState>,
    Json(rules): Json<Vec<DisplayRule>>,
) -> Result<Json<ReloadedRules>, HttpError> {
    state.store.set_display_rules(rules).await;
    let count = state.gateway.reload_display_rules().await?;
    Ok(Json(ReloadedRules { count }))
}
