//! Static configuration loaded from `devpulse.toml`, falling back to
//! defaults for any missing section or field.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::DevPulseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub conflicts: ConflictsConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            retention: RetentionConfig::default(),
            webhooks: WebhookConfig::default(),
            alerts: AlertsConfig::default(),
            conflicts: ConflictsConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl Config {
    /// Load from `DEVPULSE_CONFIG` or `./devpulse.toml`, falling back to
    /// defaults when no file exists.
    pub fn load() -> Result<Self, DevPulseError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, DevPulseError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| DevPulseError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| DevPulseError::Config(format!("parsing config: {e}")))
    }

    pub fn to_toml(&self) -> Result<String, DevPulseError> {
        toml::to_string_pretty(self)
            .map_err(|e| DevPulseError::Config(format!("serializing config: {e}")))
    }

    fn default_path() -> PathBuf {
        std::env::var("DEVPULSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("devpulse.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_ingest_deadline_ms")]
    pub ingest_deadline_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            ingest_deadline_ms: default_ingest_deadline_ms(),
        }
    }
}

fn default_port() -> u16 {
    4000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_ingest_deadline_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "devpulse.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_events_days")]
    pub events_days: i64,
    #[serde(default = "default_devlogs_days")]
    pub devlogs_days: i64,
    #[serde(default = "default_sessions_days")]
    pub sessions_days: i64,
    #[serde(default)]
    pub archive_enabled: bool,
    #[serde(default = "default_archive_dir")]
    pub archive_directory: String,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
    #[serde(default = "default_max_cleanup_ms")]
    pub max_cleanup_ms: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            events_days: default_events_days(),
            devlogs_days: default_devlogs_days(),
            sessions_days: default_sessions_days(),
            archive_enabled: false,
            archive_directory: default_archive_dir(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            max_cleanup_ms: default_max_cleanup_ms(),
        }
    }
}

fn default_events_days() -> i64 {
    30
}
fn default_devlogs_days() -> i64 {
    90
}
fn default_sessions_days() -> i64 {
    30
}
fn default_archive_dir() -> String {
    "archives".into()
}
fn default_cleanup_interval_hours() -> u64 {
    24
}
fn default_max_cleanup_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_webhook_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_webhook_queue_depth")]
    pub queue_depth: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_webhook_attempts(),
            backoff_ms: default_webhook_backoff_ms(),
            attempt_timeout_ms: default_webhook_timeout_ms(),
            queue_depth: default_webhook_queue_depth(),
        }
    }
}

fn default_webhook_attempts() -> u32 {
    3
}
fn default_webhook_backoff_ms() -> Vec<u64> {
    vec![1_000, 5_000, 30_000]
}
fn default_webhook_timeout_ms() -> u64 {
    10_000
}
fn default_webhook_queue_depth() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_error_spike_ratio")]
    pub error_spike_ratio: f64,
    #[serde(default = "default_error_spike_min_total")]
    pub error_spike_min_total: i64,
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: i64,
    #[serde(default = "default_waiting_after_secs")]
    pub waiting_after_secs: i64,
    #[serde(default = "default_critical_ratio")]
    pub critical_ratio: f64,
    #[serde(default = "default_critical_duration_secs")]
    pub critical_duration_secs: i64,
    #[serde(default = "default_rolling_window_secs")]
    pub rolling_window_secs: i64,
    #[serde(default = "default_dismiss_ttl_secs")]
    pub dismiss_ttl_secs: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            error_spike_ratio: default_error_spike_ratio(),
            error_spike_min_total: default_error_spike_min_total(),
            stuck_after_secs: default_stuck_after_secs(),
            waiting_after_secs: default_waiting_after_secs(),
            critical_ratio: default_critical_ratio(),
            critical_duration_secs: default_critical_duration_secs(),
            rolling_window_secs: default_rolling_window_secs(),
            dismiss_ttl_secs: default_dismiss_ttl_secs(),
        }
    }
}

fn default_error_spike_ratio() -> f64 {
    0.3
}
fn default_error_spike_min_total() -> i64 {
    10
}
fn default_stuck_after_secs() -> i64 {
    600
}
fn default_waiting_after_secs() -> i64 {
    300
}
fn default_critical_ratio() -> f64 {
    0.5
}
fn default_critical_duration_secs() -> i64 {
    1_800
}
fn default_rolling_window_secs() -> i64 {
    600
}
fn default_dismiss_ttl_secs() -> i64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictsConfig {
    #[serde(default = "default_conflict_window_minutes")]
    pub window_minutes: i64,
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_conflict_window_minutes(),
        }
    }
}

fn default_conflict_window_minutes() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_snapshot_events")]
    pub snapshot_events: usize,
    #[serde(default = "default_disconnect_grace_secs")]
    pub disconnect_grace_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            snapshot_events: default_snapshot_events(),
            disconnect_grace_secs: default_disconnect_grace_secs(),
        }
    }
}

fn default_subscriber_buffer() -> usize {
    256
}
fn default_snapshot_events() -> usize {
    150
}
fn default_disconnect_grace_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = Config::default();
        let text = cfg.to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.port, 4000);
        assert_eq!(back.retention.events_days, 30);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.webhooks.backoff_ms, vec![1_000, 5_000, 30_000]);
    }
}
