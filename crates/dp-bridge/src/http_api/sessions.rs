use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use dp_core::error::{DevPulseError, Result};
use dp_core::store::EventFilter;
use serde_json::{json, Value};

use crate::state::{now_ms, AppState};

/// A session with no events for 90s reads as idle (spec.md §4.2's "lazy
/// idle" transition), independent of the Alert Engine's own (longer)
/// stuck-session threshold.
const IDLE_AFTER_MS: i64 = 90_000;

/// `GET /api/sessions`. Applies the lazy-idle projection (spec.md §4.2) at
/// read time rather than storing idle transitions.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let sessions = state.store.list_sessions().await?;
    let now = now_ms();
    let idle_after_ms = IDLE_AFTER_MS;
    let projected: Vec<Value> = sessions
        .into_iter()
        .map(|s| {
            let effective = s.effective_status(now, idle_after_ms);
            let mut v = serde_json::to_value(&s).unwrap_or(Value::Null);
            if let Some(obj) = v.as_object_mut() {
                obj.insert("status".into(), json!(effective));
            }
            v
        })
        .collect();
    Ok(Json(json!({ "sessions": projected })))
}

/// `GET /api/sessions/:id/events`. `:id` is `source_app:session_id`.
pub async fn events(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let (source_app, session_id) = id
        .split_once(':')
        .ok_or_else(|| DevPulseError::Malformed("session id must be 'source_app:session_id'".into()))?;

    state
        .store
        .get_session(source_app.to_string(), session_id.to_string())
        .await?
        .ok_or_else(|| DevPulseError::NotFound(format!("session '{id}'")))?;

    let filter = EventFilter {
        source_app: Some(source_app.to_string()),
        session_id: Some(session_id.to_string()),
        hook_event_type: None,
        since: None,
    };
    let events = state.store.list_events(filter, 1_000).await?;
    Ok(Json(json!({ "events": events })))
}
