use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use dp_core::error::Result;
use dp_engine::derivation;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::{now_ms, AppState};

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_period")]
    period: String,
    project: Option<String>,
}

fn default_period() -> String {
    "day".into()
}

/// `GET /api/summaries` -- daily/weekly rollups per spec.md §4.3.
pub async fn get(State(state): State<Arc<AppState>>, Query(q): Query<SummaryQuery>) -> Result<Json<Value>> {
    let window_ms = if q.period == "week" { 7 * 86_400_000 } else { 86_400_000 };
    let cutoff = now_ms() - window_ms;

    let devlogs = state.store.list_devlogs(10_000, q.project.clone()).await?;
    let in_window: Vec<&dp_core::types::DevLog> = devlogs.iter().filter(|d| d.ended_at >= cutoff).collect();

    let mut by_project: BTreeMap<String, Vec<&dp_core::types::DevLog>> = BTreeMap::new();
    for log in in_window {
        by_project.entry(log.project_name.clone()).or_default().push(log);
    }

    let summaries: Vec<_> = by_project
        .into_iter()
        .map(|(name, logs)| derivation::summarize(&name, &logs))
        .collect();

    Ok(Json(json!({ "period": q.period, "summaries": summaries })))
}
