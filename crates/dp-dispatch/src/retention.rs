//! Retention Manager (spec.md §4.7): periodic archive-then-delete-then-
//! compact task. Follows the teacher's `start_cleanup_task` shape: read the
//! interval from live settings, tick, log before/after counts, repeat.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dp_core::config::RetentionConfig;
use dp_core::error::Result;
use dp_core::store::{CleanupReport, Store};

pub struct RetentionManager {
    store: Arc<Store>,
    config: std::sync::RwLock<RetentionConfig>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, config: RetentionConfig) -> Self {
        Self {
            store,
            config: std::sync::RwLock::new(config),
        }
    }

    pub fn update_config(&self, config: RetentionConfig) {
        *self.config.write().unwrap() = config;
    }

    pub fn config_snapshot(&self) -> RetentionConfig {
        self.config.read().unwrap().clone()
    }

    /// Runs one cleanup tick, equivalent to what the background task does
    /// on each timer fire -- also used by `POST /api/admin/cleanup` for
    /// manual cleanup.
    pub async fn run_once(&self, now_ms: i64) -> Result<CleanupReport> {
        let cfg = self.config_snapshot();
        let (report, archive_payloads) = self
            .store
            .cleanup(cfg.events_days, cfg.devlogs_days, cfg.sessions_days, cfg.archive_enabled, now_ms)
            .await?;

        let mut report = report;
        if cfg.archive_enabled {
            report.archive_files = self.write_archives(&cfg.archive_directory, archive_payloads, now_ms)?;
        }

        tracing::info!(
            events_deleted = report.events_deleted,
            devlogs_deleted = report.devlogs_deleted,
            sessions_deleted = report.sessions_deleted,
            db_size_before = report.db_size_before,
            db_size_after = report.db_size_after,
            "retention cleanup cycle completed"
        );

        Ok(report)
    }

    fn write_archives(&self, directory: &str, payloads: Vec<(String, String)>, now_ms: i64) -> Result<Vec<String>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let dir = PathBuf::from(directory);
        std::fs::create_dir_all(&dir)
            .map_err(|e| dp_core::error::DevPulseError::StoreIOError(format!("creating archive dir: {e}")))?;

        let stamp = Utc::now()
            .checked_add_signed(chrono::Duration::milliseconds(0))
            .unwrap_or_else(Utc::now);
        let _ = now_ms;
        let stamp = stamp.format("%Y%m%d-%H%M%S");

        let mut files = Vec::new();
        for (table, json) in payloads {
            let filename = format!("{stamp}-{table}.json");
            let path = dir.join(&filename);
            std::fs::write(&path, json).map_err(|e| dp_core::error::DevPulseError::StoreIOError(format!("writing archive: {e}")))?;
            files.push(path.display().to_string());
        }
        Ok(files)
    }

    /// Spawns the background tick loop. Mirrors the teacher's
    /// read-interval -> tick -> log pattern; `max_cleanup_ms` from config
    /// is enforced by the Store chunking large deletes internally.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval_hours = self.config_snapshot().cleanup_interval_hours.max(1);
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_hours * 3_600));
            interval.tick().await;
            tracing::info!(interval_hours, "retention task started");
            loop {
                interval.tick().await;
                let now_ms = Utc::now().timestamp_millis();
                if let Err(e) = self.run_once(now_ms).await {
                    tracing::warn!(error = %e, "retention cleanup cycle failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dp_core::types::{HookEventInput, HookEventType};

    async fn seeded_store() -> Arc<Store> {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store
            .ingest(
                HookEventInput {
                    source_app: "app1".into(),
                    session_id: "s1".into(),
                    hook_event_type: HookEventType::SessionStart,
                    payload: serde_json::json!({}),
                    chat: None,
                    summary: None,
                    model_name: None,
                    timestamp: Some(0),
                },
                0,
                false,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn manual_cleanup_matches_tick_semantics() {
        let store = seeded_store().await;
        let mgr = RetentionManager::new(store.clone(), RetentionConfig { events_days: 0, ..RetentionConfig::default() });
        let report = mgr.run_once(10 * 86_400_000).await.unwrap();
        assert_eq!(report.events_deleted, 1);
    }

    #[tokio::test]
    async fn archiving_writes_a_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store().await;
        let cfg = RetentionConfig {
            events_days: 0,
            archive_enabled: true,
            archive_directory: dir.path().display().to_string(),
            ..RetentionConfig::default()
        };
        let mgr = RetentionManager::new(store, cfg);
        let report = mgr.run_once(10 * 86_400_000).await.unwrap();
        assert_eq!(report.events_archived, 1);
        assert_eq!(report.archive_files.len(), 1);
        assert!(PathBuf::from(&report.archive_files[0]).exists());
    }
}
