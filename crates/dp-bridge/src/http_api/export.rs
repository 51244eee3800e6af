use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Html;
use dp_core::error::Result;
use dp_engine::derivation;
use serde::Deserialize;

use crate::state::{now_ms, AppState};

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    project: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
}

/// `GET /api/export/report` -- assembles a point-in-time HTML report of
/// recent activity for a project (or all projects). The HTML's design is
/// a presentation concern left to the caller; this endpoint just needs to
/// exist and return a body.
pub async fn report(State(state): State<Arc<AppState>>, Query(q): Query<ExportQuery>) -> Result<Html<String>> {
    let devlogs = state.store.list_devlogs(10_000, q.project.clone()).await?;
    let from = q.from.unwrap_or_else(|| now_ms() - 7 * 86_400_000);
    let to = q.to.unwrap_or_else(now_ms);
    let in_window: Vec<&dp_core::types::DevLog> = devlogs
        .iter()
        .filter(|d| d.ended_at >= from && d.started_at <= to)
        .filter(|d| q.session_id.as_deref().is_none_or(|id| d.session_id == id))
        .collect();
    let summary = derivation::summarize(q.project.as_deref().unwrap_or("all"), &in_window);
    let (events, sessions, projects, _devlogs, webhooks) = state.store.stats().await?;

    let tool_rows: String = summary
        .tool_breakdown
        .iter()
        .map(|(tool, count)| format!("<tr><td>{tool}</td><td>{count}</td></tr>"))
        .collect();

    let html = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>devpulse report</title></head><body>\
         <h1>DevPulse report -- {project}</h1>\
         <p>generated_at: {generated_at}</p>\
         <h2>Summary</h2>\
         <ul>\
         <li>session_count: {session_count}</li>\
         <li>total_duration_minutes: {duration}</li>\
         <li>files_changed: {files_changed}</li>\
         <li>commit_count: {commit_count}</li>\
         </ul>\
         <h2>Tool breakdown</h2>\
         <table><thead><tr><th>tool</th><th>count</th></tr></thead><tbody>{tool_rows}</tbody></table>\
         <h2>Totals</h2>\
         <ul>\
         <li>events: {events}</li>\
         <li>sessions: {sessions}</li>\
         <li>projects: {projects}</li>\
         <li>webhooks: {webhooks}</li>\
         </ul>\
         </body></html>",
        project = summary.project_name,
        generated_at = now_ms(),
        session_count = summary.session_count,
        duration = summary.total_duration_minutes,
        files_changed = summary.files_changed.len(),
        commit_count = summary.commit_count,
    );

    Ok(Html(html))
}
