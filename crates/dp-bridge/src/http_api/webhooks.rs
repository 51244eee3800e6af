use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use dp_core::error::{DevPulseError, Result};
use dp_core::types::{HookEventType, Webhook};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookInput {
    pub name: String,
    pub url: String,
    pub secret: Option<String>,
    #[serde(default)]
    pub event_types: Vec<HookEventType>,
    pub project_filter: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

fn to_webhook(id: i64, input: WebhookInput) -> Webhook {
    Webhook {
        id,
        name: input.name,
        url: input.url,
        secret: input.secret,
        event_types: input.event_types,
        project_filter: input.project_filter,
        active: input.active,
        trigger_count: 0,
        failure_count: 0,
        last_status: None,
        last_error: None,
        last_triggered_at: None,
    }
}

/// `GET /api/webhooks`.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let webhooks = state.store.list_webhooks().await?;
    Ok(Json(json!({ "webhooks": webhooks })))
}

/// `POST /api/webhooks`.
pub async fn create(State(state): State<Arc<AppState>>, Json(input): Json<WebhookInput>) -> Result<Json<Value>> {
    let id = state.store.insert_webhook(to_webhook(0, input)).await?;
    let webhook = state.store.get_webhook(id).await?.ok_or_else(|| DevPulseError::Internal("webhook vanished after insert".into()))?;
    Ok(Json(json!({ "webhook": webhook })))
}

/// `PUT /api/webhooks/:id`.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<WebhookInput>,
) -> Result<Json<Value>> {
    let updated = state.store.update_webhook(id, to_webhook(id, input)).await?;
    if !updated {
        return Err(DevPulseError::NotFound(format!("webhook '{id}'")));
    }
    let webhook = state.store.get_webhook(id).await?.ok_or_else(|| DevPulseError::NotFound(format!("webhook '{id}'")))?;
    Ok(Json(json!({ "webhook": webhook })))
}

/// `DELETE /api/webhooks/:id`.
pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let deleted = state.store.delete_webhook(id).await?;
    if !deleted {
        return Err(DevPulseError::NotFound(format!("webhook '{id}'")));
    }
    Ok(Json(json!({ "deleted": true })))
}

/// `POST /api/webhooks/:id/test` -- fires a synthetic payload inline and
/// reports the outcome without touching the retry queue.
pub async fn test(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let webhook = state.store.get_webhook(id).await?.ok_or_else(|| DevPulseError::NotFound(format!("webhook '{id}'")))?;
    match state.webhooks.test_delivery(&webhook).await {
        Ok(status) => Ok(Json(json!({ "status": status }))),
        Err(error) => Ok(Json(json!({ "error": error }))),
    }
}
