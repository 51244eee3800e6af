//! Shared application state for all HTTP/WS handlers (spec.md §9's
//! per-task concurrency model), wiring the Store to the Event Processor,
//! Alert Engine, Webhook Dispatcher, Retention Manager, and Broadcast Hub.

use std::sync::Arc;

use dp_core::config::Config;
use dp_core::error::Result;
use dp_core::store::Store;
use dp_core::types::{InitialSnapshot, StreamMessage};
use dp_dispatch::retention::RetentionManager;
use dp_dispatch::webhooks::WebhookDispatcher;
use dp_engine::alerts::AlertEngine;
use dp_engine::conflicts::ConflictDetector;
use dp_engine::processor::{self, EventProcessor};

use crate::hub::BroadcastHub;

pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub processor: EventProcessor,
    pub alerts: Arc<AlertEngine>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub retention: Arc<RetentionManager>,
    pub hub: Arc<BroadcastHub>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let store = Arc::new(Store::open(&config.store.path).await?);
        let conflicts = Arc::new(ConflictDetector::new(config.conflicts.window_minutes));
        let alerts = Arc::new(AlertEngine::new(config.alerts.clone()));
        let processor = EventProcessor::new(store.clone(), conflicts, alerts.clone());
        let webhooks = Arc::new(WebhookDispatcher::new(store.clone(), config.webhooks.clone()));
        let retention = Arc::new(RetentionManager::new(store.clone(), config.retention.clone()));
        let hub = BroadcastHub::new(config.broadcast.subscriber_buffer);

        Ok(Arc::new(Self {
            config,
            store,
            processor,
            alerts,
            webhooks,
            retention,
            hub,
            start_time: std::time::Instant::now(),
        }))
    }

    /// Builds the `initial` snapshot message sent to a client right after
    /// it subscribes (spec.md §4.8): the most recent events plus the
    /// current projects/sessions/topology/conflicts/alerts.
    pub async fn snapshot(&self) -> Result<InitialSnapshot> {
        let events = self.store.recent_events(self.config.broadcast.snapshot_events).await?;
        let projects = self.store.list_projects().await?;
        let sessions = self.store.list_sessions().await?;
        let topology = processor::topology(&sessions);
        let conflicts = self.store.list_active_conflicts(self.config.conflicts.window_minutes, now_ms()).await?;
        let alerts = self.alerts.active_alerts();

        Ok(InitialSnapshot { events, projects, sessions, topology, conflicts, alerts })
    }

    /// Spawns the periodic alert-evaluation loop, grounded on the same
    /// `tokio::time::interval` shape the retention task uses.
    pub fn spawn_alert_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                let now = now_ms();
                match state.store.list_sessions().await {
                    Ok(sessions) => {
                        let new_alerts = state.alerts.evaluate(&sessions, now);
                        if !new_alerts.is_empty() {
                            state.hub.publish(StreamMessage::Alerts { data: state.alerts.active_alerts() });
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "alert evaluation: failed to list sessions"),
                }
            }
        })
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
