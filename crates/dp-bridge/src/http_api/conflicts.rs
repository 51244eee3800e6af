use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use dp_core::error::{DevPulseError, Result};
use serde_json::{json, Value};

use crate::state::{now_ms, AppState};

/// `GET /api/conflicts` -- currently active file conflicts.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let conflicts = state.store.list_active_conflicts(state.config.conflicts.window_minutes, now_ms()).await?;
    Ok(Json(json!({ "conflicts": conflicts })))
}

/// `POST /api/conflicts/:id/dismiss`.
pub async fn dismiss(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let dismissed = state.store.dismiss_conflict(id).await?;
    if !dismissed {
        return Err(DevPulseError::NotFound(format!("conflict '{id}'")));
    }
    Ok(Json(json!({ "dismissed": true })))
}
