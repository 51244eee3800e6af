use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dp_core::error::Result;
use dp_core::types::Setting;
use dp_telemetry::metrics::global_metrics;
use serde_json::{json, Value};

use crate::state::{now_ms, AppState};

/// `GET /api/admin/stats` -- JSON stats payload by default; Prometheus text
/// exposition (spec.md §11's ambient telemetry addition) when the caller
/// sends `Accept: text/plain`.
pub async fn stats(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let wants_prometheus = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/plain"));

    if wants_prometheus {
        let body = global_metrics().render_prometheus();
        return Ok(([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body).into_response());
    }

    let (events, sessions, projects, devlogs, webhooks) = state.store.stats().await?;
    Ok(Json(json!({
        "events": events,
        "sessions": sessions,
        "projects": projects,
        "devlogs": devlogs,
        "webhooks": webhooks,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "subscribers": state.hub.subscriber_count(),
    }))
    .into_response())
}

/// `POST /api/admin/cleanup` -- runs one retention cycle on demand.
pub async fn cleanup(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let report = state.retention.run_once(now_ms()).await?;
    Ok(Json(json!({
        "events_deleted": report.events_deleted,
        "events_archived": report.events_archived,
        "devlogs_deleted": report.devlogs_deleted,
        "devlogs_archived": report.devlogs_archived,
        "sessions_deleted": report.sessions_deleted,
        "sessions_archived": report.sessions_archived,
        "archive_files": report.archive_files,
        "db_size_before": report.db_size_before,
        "db_size_after": report.db_size_after,
    })))
}

/// `GET /api/admin/settings`.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let settings = state.store.list_settings().await?;
    Ok(Json(json!({ "settings": settings })))
}

/// `PUT /api/admin/settings` -- upserts one setting key/value pair. Keys
/// under `retention.*` (spec.md §4.7) additionally take effect immediately
/// by updating the live `RetentionManager` config, not just the next
/// cleanup tick's read of `devpulse.toml`.
pub async fn put_settings(State(state): State<Arc<AppState>>, Json(setting): Json<Setting>) -> Result<Json<Value>> {
    state.store.set_setting(setting.key.clone(), setting.value.clone()).await?;
    apply_retention_setting(&state, &setting.key, &setting.value);
    Ok(Json(json!({ "setting": setting })))
}

fn apply_retention_setting(state: &AppState, key: &str, value: &str) {
    let mut cfg = state.retention.config_snapshot();
    let changed = match key {
        "retention.events.days" => value.parse().map(|v| cfg.events_days = v).is_ok(),
        "retention.devlogs.days" => value.parse().map(|v| cfg.devlogs_days = v).is_ok(),
        "retention.sessions.days" => value.parse().map(|v| cfg.sessions_days = v).is_ok(),
        "retention.archive.enabled" => value.parse().map(|v| cfg.archive_enabled = v).is_ok(),
        "retention.archive.directory" => {
            cfg.archive_directory = value.to_string();
            true
        }
        "retention.cleanup.interval.hours" => value.parse().map(|v| cfg.cleanup_interval_hours = v).is_ok(),
        _ => false,
    };
    if changed {
        state.retention.update_config(cfg);
    }
}
