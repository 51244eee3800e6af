//! HTTP/WS API surface (spec.md §6), split into domain modules the way the
//! teacher splits its API into one file per resource; this file wires them
//! into a single Axum router.

mod admin;
mod analytics;
mod conflicts;
mod costs;
mod devlogs;
mod events;
mod export;
mod metrics;
mod projects;
mod search;
mod sessions;
mod stream;
mod summaries;
mod topology;
mod webhooks;

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use dp_telemetry::middleware::metrics_middleware;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full API router with every REST route and the `/stream`
/// WebSocket from spec.md §6.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", post(events::ingest))
        .route("/events/recent", get(events::recent))
        .route("/events/filter-options", get(events::filter_options))
        .route("/api/projects", get(projects::list))
        .route("/api/projects/{name}", get(projects::get))
        .route("/api/sessions", get(sessions::list))
        .route("/api/sessions/{id}/events", get(sessions::events))
        .route("/api/devlogs", get(devlogs::list))
        .route("/api/topology", get(topology::get))
        .route("/api/summaries", get(summaries::get))
        .route("/api/costs", get(costs::get))
        .route("/api/metrics", get(metrics::get))
        .route("/api/conflicts", get(conflicts::list))
        .route("/api/conflicts/{id}/dismiss", post(conflicts::dismiss))
        .route("/api/search", get(search::get))
        .route("/api/analytics/heatmap", get(analytics::heatmap))
        .route("/api/webhooks", get(webhooks::list))
        .route("/api/webhooks", post(webhooks::create))
        .route("/api/webhooks/{id}", put(webhooks::update))
        .route("/api/webhooks/{id}", delete(webhooks::delete))
        .route("/api/webhooks/{id}/test", post(webhooks::test))
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/cleanup", post(admin::cleanup))
        .route("/api/admin/settings", get(admin::get_settings))
        .route("/api/admin/settings", put(admin::put_settings))
        .route("/api/export/report", get(export::report))
        .route("/stream", get(stream::handler))
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
