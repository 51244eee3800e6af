use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use dp_core::error::Result;
use dp_core::types::HookEventInput;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::{now_ms, AppState};

/// `POST /events` -- spec.md §6's ingest endpoint. Runs the Event Processor,
/// then broadcasts and hands the event to the Webhook Dispatcher off the
/// critical path.
pub async fn ingest(State(state): State<Arc<AppState>>, Json(input): Json<HookEventInput>) -> Result<Json<Value>> {
    let result = state.processor.ingest(input, now_ms()).await?;

    state.hub.publish_event(result.event.clone(), &result.project.name);
    state.hub.publish(dp_core::types::StreamMessage::Projects { data: vec![result.project.clone()] });
    state.hub.publish(dp_core::types::StreamMessage::Sessions { data: vec![result.session.clone()] });
    if let Some(devlog) = &result.devlog {
        state.hub.publish(dp_core::types::StreamMessage::Devlogs { data: vec![devlog.clone()] });
    }
    if let Some(conflict) = &result.conflict {
        state.hub.publish(dp_core::types::StreamMessage::Conflicts { data: vec![conflict.clone()] });
    }

    let webhooks = state.webhooks.clone();
    let event = result.event.clone();
    let project_name = result.project.name.clone();
    tokio::spawn(async move { webhooks.dispatch(&event, &project_name).await });

    Ok(Json(json!({
        "event": result.event,
        "session": result.session,
        "project": result.project,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<usize>,
}

/// `GET /events/recent`.
pub async fn recent(State(state): State<Arc<AppState>>, Query(q): Query<RecentQuery>) -> Result<Json<Value>> {
    let limit = q.limit.unwrap_or(100).min(1_000);
    let events = state.store.recent_events(limit).await?;
    Ok(Json(json!({ "events": events })))
}

/// `GET /events/filter-options` -- distinct source apps/sessions/event types
/// currently known to the store, used to populate filter dropdowns.
pub async fn filter_options(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let (source_apps, session_ids, hook_event_types) = state.store.filter_options().await?;
    Ok(Json(json!({
        "source_apps": source_apps,
        "session_ids": session_ids,
        "hook_event_types": hook_event_types,
    })))
}
