use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use dp_core::error::Result;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DevlogQuery {
    limit: Option<usize>,
    project: Option<String>,
}

/// `GET /api/devlogs`.
pub async fn list(State(state): State<Arc<AppState>>, Query(q): Query<DevlogQuery>) -> Result<Json<Value>> {
    let limit = q.limit.unwrap_or(50).min(500);
    let devlogs = state.store.list_devlogs(limit, q.project).await?;
    Ok(Json(json!({ "devlogs": devlogs })))
}
