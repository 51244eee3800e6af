use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use dp_core::error::Result;
use dp_engine::derivation;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /api/costs` -- estimated spend per project, derived from recent
/// event payload sizes (spec.md §4.3's cost estimate, not exact accounting
/// per the non-goal).
pub async fn get(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let sessions = state.store.list_sessions().await?;
    let project_of: HashMap<(String, String), String> = sessions
        .into_iter()
        .map(|s| ((s.source_app.clone(), s.session_id.clone()), s.project_name))
        .collect();

    let events = state.store.recent_events(5_000).await?;
    let mut by_project: BTreeMap<String, f64> = BTreeMap::new();
    for event in &events {
        let project = project_of
            .get(&(event.source_app.clone(), event.session_id.clone()))
            .cloned()
            .unwrap_or_else(|| "unknown".into());
        *by_project.entry(project).or_insert(0.0) += derivation::event_cost_usd(event);
    }

    Ok(Json(json!({
        "cost_table": derivation::cost_table(),
        "by_project": by_project,
    })))
}
