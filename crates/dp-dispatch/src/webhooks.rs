//! Webhook Dispatcher (spec.md §4.6). Matches each persisted event against
//! the active webhook set and posts signed payloads with bounded retry, off
//! the ingest critical path. Retry mechanics (generic async call wrapped in
//! a per-attempt timeout, structured tracing of each attempt) follow the
//! shape of a circuit breaker's `call<F, Fut, T, E>` helper; the retry
//! *policy* here is spec.md's fixed three-attempt backoff schedule rather
//! than open/half-open/closed circuit state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dp_core::config::WebhookConfig;
use dp_core::store::Store;
use dp_core::types::{HookEvent, Webhook};
use ring::hmac;
use tokio::sync::{Mutex, Notify};

struct DispatchJob {
    webhook: Webhook,
    event_type: String,
    project_name: String,
    body: String,
}

struct WebhookQueue {
    jobs: Mutex<VecDeque<DispatchJob>>,
    notify: Notify,
}

pub struct WebhookDispatcher {
    store: Arc<Store>,
    client: reqwest::Client,
    config: WebhookConfig,
    queues: Mutex<HashMap<i64, Arc<WebhookQueue>>>,
}

fn signature(secret: &str, body: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, body.as_bytes());
    format!("sha256={}", hex_encode(tag.as_ref()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl WebhookDispatcher {
    pub fn new(store: Arc<Store>, config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.attempt_timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            store,
            client,
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Matches `event` against the currently active webhook set and enqueues
    /// a dispatch job for each match; spawns a worker for a webhook the
    /// first time it is seen.
    pub async fn dispatch(self: &Arc<Self>, event: &HookEvent, project_name: &str) {
        let webhooks = match self.store.list_webhooks().await {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load webhooks for dispatch");
                return;
            }
        };

        for webhook in webhooks {
            if !webhook.matches(event.hook_event_type, project_name) {
                continue;
            }
            let body = serde_json::json!({
                "type": event.hook_event_type.as_str(),
                "event": event,
                "project_name": project_name,
            })
            .to_string();

            let job = DispatchJob {
                webhook: webhook.clone(),
                event_type: event.hook_event_type.as_str().to_string(),
                project_name: project_name.to_string(),
                body,
            };

            self.enqueue(webhook.id, job).await;
        }
    }

    async fn enqueue(self: &Arc<Self>, webhook_id: i64, job: DispatchJob) {
        let queue = {
            let mut queues = self.queues.lock().await;
            if let Some(q) = queues.get(&webhook_id) {
                q.clone()
            } else {
                let q = Arc::new(WebhookQueue {
                    jobs: Mutex::new(VecDeque::new()),
                    notify: Notify::new(),
                });
                queues.insert(webhook_id, q.clone());
                let this = self.clone();
                let worker_queue = q.clone();
                tokio::spawn(async move { this.run_worker(webhook_id, worker_queue).await });
                q
            }
        };

        let depth = self.config.queue_depth;
        let mut jobs = queue.jobs.lock().await;
        if jobs.len() >= depth {
            jobs.pop_front();
            let store = self.store.clone();
            let now = now_ms();
            tokio::spawn(async move {
                let _ = store
                    .record_webhook_attempt(webhook_id, None, Some("queue overflow: dropped oldest pending".into()), false, now)
                    .await;
            });
        }
        jobs.push_back(job);
        queue.notify.notify_one();
    }

    async fn run_worker(self: Arc<Self>, webhook_id: i64, queue: Arc<WebhookQueue>) {
        loop {
            let job = {
                let mut jobs = queue.jobs.lock().await;
                jobs.pop_front()
            };
            let Some(job) = job else {
                queue.notify.notified().await;
                continue;
            };
            self.attempt_delivery(webhook_id, job).await;
        }
    }

    async fn attempt_delivery(&self, webhook_id: i64, job: DispatchJob) {
        let mut last_status = None;
        let mut last_error = None;

        for (attempt, backoff_ms) in self.config.backoff_ms.iter().take(self.config.max_attempts as usize).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
            }

            let mut request = self
                .client
                .post(&job.webhook.url)
                .header("Content-Type", "application/json")
                .body(job.body.clone());

            if let Some(secret) = &job.webhook.secret {
                request = request.header("X-DevPulse-Signature", signature(secret, &job.body));
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    last_status = Some(status.as_u16());
                    if status.is_success() {
                        let _ = self
                            .store
                            .record_webhook_attempt(webhook_id, last_status, None, true, now_ms())
                            .await;
                        tracing::info!(webhook_id, attempt, status = status.as_u16(), "webhook delivered");
                        return;
                    }
                    last_error = Some(format!("http {status}"));
                    tracing::warn!(webhook_id, attempt, status = status.as_u16(), "webhook attempt failed");
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    tracing::warn!(webhook_id, attempt, error = %e, "webhook attempt errored");
                }
            }
        }

        let _ = self
            .store
            .record_webhook_attempt(webhook_id, last_status, last_error, false, now_ms())
            .await;
        let _ = job.event_type;
        let _ = job.project_name;
    }

    /// Posts a synthetic payload and reports the status inline (no retry,
    /// no queue) -- the `POST /api/webhooks/:id/test` handler.
    pub async fn test_delivery(&self, webhook: &Webhook) -> Result<u16, String> {
        let body = serde_json::json!({
            "type": "Test",
            "event": {"hook_event_type": "Notification", "payload": {}},
            "project_name": "test",
        })
        .to_string();

        let mut request = self.client.post(&webhook.url).header("Content-Type", "application/json").body(body.clone());
        if let Some(secret) = &webhook.secret {
            request = request.header("X-DevPulse-Signature", signature(secret, &body));
        }

        match request.send().await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_hmac_sha256_hex() {
        let sig = signature("k", "body");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }

    #[test]
    fn signature_is_deterministic() {
        assert_eq!(signature("secret", "{}"), signature("secret", "{}"));
        assert_ne!(signature("secret", "{}"), signature("other", "{}"));
    }
}
