use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use dp_core::error::Result;
use dp_engine::processor;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /api/topology` -- the agent parent/child arena (spec.md §9).
pub async fn get(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let sessions = state.store.list_sessions().await?;
    let nodes = processor::topology(&sessions);
    Ok(Json(json!({ "nodes": nodes })))
}
