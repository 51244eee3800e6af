use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use dp_core::error::Result;
use dp_engine::derivation;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HeatmapQuery {
    #[serde(default = "default_days")]
    days: i64,
    project: Option<String>,
}

fn default_days() -> i64 {
    30
}

/// `GET /api/analytics/heatmap` -- day-of-week x hour-of-day activity grid.
pub async fn heatmap(State(state): State<Arc<AppState>>, Query(q): Query<HeatmapQuery>) -> Result<Json<Value>> {
    let cells = state.store.heatmap(q.days, q.project).await?;
    let (cells, max_count) = derivation::heatmap_response(cells);
    Ok(Json(json!({ "cells": cells, "max_count": max_count })))
}
