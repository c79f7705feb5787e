//! Audit log handler.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use conflux_core::AuditEntry;

use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// Most recent audit entries, oldest first.
pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Json(state.gateway.recent_audit(limit).await)
}
