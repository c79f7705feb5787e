//! Backend server handlers - configuration and lifecycle.

use axum::Json;
use axum::extract::{Path, State};

use conflux_core::BackendServer;
use conflux_gateway::BackendInfo;

use crate::error::HttpError;
use crate::state::AppState;

/// List every known backend with its status.
pub async fn list(State(state): State<AppState>) -> Json<Vec<BackendInfo>> {
    Json(state.gateway.list_backends().await)
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BackendInfo>, HttpError> {
    Ok(Json(state.gateway.backend_status(&id).await?))
}

/// Add or replace a backend config.
///
/// The registry is reconciled before returning, so an `autoStart`
/// backend is already starting (or failed) in the response.
pub async fn upsert(
    State(state): State<AppState>,
    Json(server): Json<BackendServer>,
) -> Result<Json<BackendInfo>, HttpError> {
    server
        .config
        .validate(server.server_type)
        .map_err(HttpError::BadRequest)?;

    let id = server.id.clone();
    state.store.upsert_server(server).await?;
    state.gateway.sync_backends().await?;
    Ok(Json(state.gateway.backend_status(&id).await?))
}

/// Remove a backend config, stopping it if running.
pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), HttpError> {
    state.store.remove_server(&id).await?;
    state.gateway.sync_backends().await?;
    Ok(())
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BackendInfo>, HttpError> {
    Ok(Json(state.gateway.start_backend(&id).await?))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BackendInfo>, HttpError> {
    Ok(Json(state.gateway.stop_backend(&id).await?))
}
