//! Hook handlers. Scripts are compiled before they are stored.

use axum::Json;
use axum::extract::{Path, State};

use conflux_core::{Hook, NewHook};

use crate::error::HttpError;
use crate::state::AppState;

/// List hooks in execution order.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Hook>>, HttpError> {
    Ok(Json(state.gateway.hooks().list_hooks().await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(hook): Json<NewHook>,
) -> Result<Json<Hook>, HttpError> {
    Ok(Json(state.gateway.hooks().create_hook(hook).await?))
}

/// Replace a hook. The path id wins over any id in the body.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut hook): Json<Hook>,
) -> Result<Json<Hook>, HttpError> {
    hook.id = id;
    hook.updated_at = chrono::Utc::now();
    state.gateway.hooks().update_hook(&hook).await?;
    Ok(Json(hook))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), HttpError> {
    state.gateway.hooks().delete_hook(&id).await?;
    Ok(())
}
