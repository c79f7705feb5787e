//! Workflow handlers - graph storage and activation.

use axum::Json;
use axum::extract::{Path, State};

use conflux_core::Workflow;

use crate::error::HttpError;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Workflow>>, HttpError> {
    Ok(Json(state.gateway.workflows().list().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, HttpError> {
    Ok(Json(state.gateway.workflows().get(&id).await?))
}

/// Store a workflow. New workflows start inactive.
pub async fn save(
    State(state): State<AppState>,
    Json(workflow): Json<Workflow>,
) -> Result<Json<Workflow>, HttpError> {
    Ok(Json(state.gateway.workflows().save(workflow).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut workflow): Json<Workflow>,
) -> Result<Json<Workflow>, HttpError> {
    workflow.id = id;
    Ok(Json(state.gateway.workflows().save(workflow).await?))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), HttpError> {
    state.gateway.workflows().delete(&id).await?;
    Ok(())
}

/// Make this the active workflow for its request type.
pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, HttpError> {
    let workflows = state.gateway.workflows();
    workflows.activate(&id).await?;
    Ok(Json(workflows.get(&id).await?))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, HttpError> {
    let workflows = state.gateway.workflows();
    workflows.deactivate(&id).await?;
    Ok(Json(workflows.get(&id).await?))
}
