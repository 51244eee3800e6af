use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use dp_core::error::Result;
use dp_core::types::EventFilterScope;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default = "default_scope")]
    scope: EventFilterScope,
    limit: Option<usize>,
}

fn default_scope() -> EventFilterScope {
    EventFilterScope::All
}

/// `GET /api/search` -- LIKE-based search, capped at 20 results per kind by
/// default (spec.md §4.1). An empty query returns empty results, not an
/// error.
pub async fn get(State(state): State<Arc<AppState>>, Query(q): Query<SearchQuery>) -> Result<Json<Value>> {
    let limit = q.limit.unwrap_or(20).min(100);
    let (events, sessions, devlogs) = state.store.search(q.q, q.scope, limit).await?;
    Ok(Json(json!({ "events": events, "sessions": sessions, "devlogs": devlogs })))
}
