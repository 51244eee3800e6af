//! `GET /api/metrics` -- derived performance metrics (spec.md §6), not to
//! be confused with the ambient Prometheus exposition folded into
//! `GET /api/admin/stats`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use dp_core::error::Result;
use dp_core::store::EventFilter;
use dp_engine::derivation;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default = "default_group")]
    group: String,
    project: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
}

fn default_group() -> String {
    "session".into()
}

/// `GET /api/metrics?group=session|project&project?&start?&end?`.
pub async fn get(State(state): State<Arc<AppState>>, Query(q): Query<MetricsQuery>) -> Result<Json<Value>> {
    let sessions = state.store.list_sessions().await?;
    let in_scope: Vec<&dp_core::types::Session> = sessions
        .iter()
        .filter(|s| q.project.as_deref().is_none_or(|p| s.project_name == p))
        .filter(|s| q.start.is_none_or(|start| s.last_event_at >= start))
        .filter(|s| q.end.is_none_or(|end| s.started_at <= end))
        .collect();

    let mut per_session = Vec::with_capacity(in_scope.len());
    for session in &in_scope {
        let filter = EventFilter {
            source_app: Some(session.source_app.clone()),
            session_id: Some(session.session_id.clone()),
            hook_event_type: None,
            since: None,
        };
        let events = state.store.list_events(filter, 10_000).await?;
        per_session.push(derivation::session_metrics(session, &events));
    }

    if q.group == "project" {
        let metrics = derivation::project_metrics(&in_scope, &per_session);
        return Ok(Json(json!({ "group": "project", "project": q.project, "metrics": metrics })));
    }

    let sessions_json: Vec<Value> = in_scope
        .iter()
        .zip(per_session.iter())
        .map(|(s, m)| {
            json!({
                "source_app": s.source_app,
                "session_id": s.session_id,
                "project_name": s.project_name,
                "metrics": m,
            })
        })
        .collect();

    Ok(Json(json!({ "group": "session", "sessions": sessions_json })))
}
