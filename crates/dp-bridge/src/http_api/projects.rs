use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use dp_core::error::{DevPulseError, Result};
use dp_engine::derivation;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /api/projects`.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let projects = state.store.list_projects().await?;
    Ok(Json(json!({ "projects": projects })))
}

/// `GET /api/projects/:name`.
pub async fn get(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Result<Json<Value>> {
    let project = state
        .store
        .get_project(name.clone())
        .await?
        .ok_or_else(|| DevPulseError::NotFound(format!("project '{name}'")))?;

    let sessions = state.store.list_sessions().await?;
    let project_sessions: Vec<&dp_core::types::Session> =
        sessions.iter().filter(|s| s.project_name == name).collect();
    let active_sessions = derivation::active_session_count(&project_sessions);

    Ok(Json(json!({
        "project": project,
        "active_sessions": active_sessions,
    })))
}
