//! Alert Engine (spec.md §4.5): rolling-counter alerts over the most
//! recent 10 minutes, deduplicated by `(kind, agentLabel)`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use dp_core::config::AlertsConfig;
use dp_core::types::{Alert, AlertKind, AlertSeverity, Session, SessionStatus};

struct ToolOutcome {
    timestamp: i64,
    success: bool,
}

pub struct AlertEngine {
    config: AlertsConfig,
    tool_events: Mutex<VecDeque<ToolOutcome>>,
    active: Mutex<HashMap<(AlertKind, String), Alert>>,
    next_id: AtomicI64,
}

impl AlertEngine {
    pub fn new(config: AlertsConfig) -> Self {
        Self {
            config,
            tool_events: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Feeds a `PostToolUse`/`PostToolUseFailure` outcome into the rolling
    /// error-rate window.
    pub fn record_tool_outcome(&self, now_ms: i64, success: bool) {
        let mut events = self.tool_events.lock().unwrap();
        events.push_back(ToolOutcome { timestamp: now_ms, success });
        let window_ms = self.config.rolling_window_secs * 1_000;
        while let Some(front) = events.front() {
            if now_ms - front.timestamp > window_ms {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Re-evaluates all three alert kinds given the current session set and
    /// now. Returns newly-arisen or newly-escalated alerts; clears state for
    /// conditions that no longer hold so a later recurrence re-emits.
    pub fn evaluate(&self, sessions: &[Session], now_ms: i64) -> Vec<Alert> {
        let mut emitted = Vec::new();
        let mut active = self.active.lock().unwrap();

        // error_spike: global ratio over the rolling window.
        {
            let events = self.tool_events.lock().unwrap();
            let total = events.len() as i64;
            let failures = events.iter().filter(|e| !e.success).count() as i64;
            let key = (AlertKind::ErrorSpike, "global".to_string());
            let ratio = if total > 0 { failures as f64 / total as f64 } else { 0.0 };
            let firing = total >= self.config.error_spike_min_total && ratio > self.config.error_spike_ratio;
            if firing {
                if !active.contains_key(&key) {
                    let severity = if ratio > self.config.critical_ratio {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };
                    let alert = Alert {
                        id: self.next_id(),
                        kind: AlertKind::ErrorSpike,
                        severity,
                        agent_label: "global".into(),
                        message: format!("error rate {:.0}% over last {} events", ratio * 100.0, total),
                        detected_at: now_ms,
                    };
                    active.insert(key, alert.clone());
                    emitted.push(alert);
                }
            } else {
                active.remove(&key);
            }
        }

        for session in sessions {
            let label = session.agent_id();

            let stuck_key = (AlertKind::StuckSession, label.clone());
            let stuck_secs = (now_ms - session.last_event_at) / 1_000;
            let stuck_firing = session.status == SessionStatus::Active && stuck_secs > self.config.stuck_after_secs;
            if stuck_firing {
                if !active.contains_key(&stuck_key) {
                    let severity = if stuck_secs > self.config.critical_duration_secs {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };
                    let alert = Alert {
                        id: self.next_id(),
                        kind: AlertKind::StuckSession,
                        severity,
                        agent_label: label.clone(),
                        message: format!("no activity for {stuck_secs}s"),
                        detected_at: now_ms,
                    };
                    active.insert(stuck_key, alert.clone());
                    emitted.push(alert);
                }
            } else {
                active.remove(&stuck_key);
            }

            let waiting_key = (AlertKind::WaitingTooLong, label.clone());
            let waiting_secs = (now_ms - session.last_event_at) / 1_000;
            let waiting_firing = session.status == SessionStatus::Waiting && waiting_secs > self.config.waiting_after_secs;
            if waiting_firing {
                if !active.contains_key(&waiting_key) {
                    let severity = if waiting_secs > self.config.critical_duration_secs {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };
                    let alert = Alert {
                        id: self.next_id(),
                        kind: AlertKind::WaitingTooLong,
                        severity,
                        agent_label: label.clone(),
                        message: format!("waiting for {waiting_secs}s"),
                        detected_at: now_ms,
                    };
                    active.insert(waiting_key, alert.clone());
                    emitted.push(alert);
                }
            } else {
                active.remove(&waiting_key);
            }
        }

        emitted
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(label: &str, status: SessionStatus, last_event_at: i64) -> Session {
        Session {
            session_id: label.into(),
            source_app: "app".into(),
            project_name: "p".into(),
            status,
            current_branch: None,
            started_at: 0,
            last_event_at,
            event_count: 1,
            model_name: None,
            cwd: None,
            task_context: None,
            compaction_count: 0,
            last_compaction_at: None,
            compaction_history: Vec::new(),
            parent_id: None,
            tool_use_count: 0,
            tool_failure_count: 0,
        }
    }

    #[test]
    fn error_spike_fires_above_threshold() {
        let engine = AlertEngine::new(AlertsConfig::default());
        let now = 1_000_000;
        for _ in 0..7 {
            engine.record_tool_outcome(now, true);
        }
        for _ in 0..3 {
            engine.record_tool_outcome(now, false);
        }
        let alerts = engine.evaluate(&[], now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::ErrorSpike);
    }

    #[test]
    fn stuck_session_fires_after_ten_minutes() {
        let engine = AlertEngine::new(AlertsConfig::default());
        let now = 20 * 60 * 1_000;
        let s = session("app:s1", SessionStatus::Active, now - 11 * 60 * 1_000);
        let alerts = engine.evaluate(&[s], now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::StuckSession);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn alert_clears_and_can_reemit() {
        let engine = AlertEngine::new(AlertsConfig::default());
        let now = 20 * 60 * 1_000;
        let stuck = session("app:s1", SessionStatus::Active, now - 11 * 60 * 1_000);
        let alerts = engine.evaluate(&[stuck], now);
        assert_eq!(alerts.len(), 1);

        let recovered = session("app:s1", SessionStatus::Active, now);
        let alerts = engine.evaluate(&[recovered], now);
        assert!(alerts.is_empty());
        assert!(engine.active_alerts().is_empty());

        let stuck_again = session("app:s1", SessionStatus::Active, now - 11 * 60 * 1_000);
        let alerts = engine.evaluate(&[stuck_again], now);
        assert_eq!(alerts.len(), 1);
    }
}
