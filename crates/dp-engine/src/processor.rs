//! Event Processor (spec.md §4.2): the single entry point turning a raw
//! hook event into durable state. Orchestrates the Store (for the
//! transactional event/session/project/devlog write), the in-memory
//! Conflict Detector, and the Alert Engine.

use std::sync::Arc;

use dp_core::error::{DevPulseError, Result};
use dp_core::store::Store;
use dp_core::types::{AgentNode, FileConflict, HookEventInput, HookEventType, Session};

use crate::alerts::AlertEngine;
use crate::conflicts::ConflictDetector;

/// What changed as a result of one `Ingest` call; the caller (the API
/// handler) turns this into Broadcast Hub notifications and hands the
/// event to the Webhook Dispatcher.
pub struct IngestResult {
    pub event: dp_core::types::HookEvent,
    pub session: Session,
    pub project: dp_core::types::Project,
    pub devlog: Option<dp_core::types::DevLog>,
    pub conflict: Option<FileConflict>,
}

pub struct EventProcessor {
    store: Arc<Store>,
    conflicts: Arc<ConflictDetector>,
    alerts: Arc<AlertEngine>,
}

const SKEW_BACKWARD_MS: i64 = 24 * 3_600_000;
const SKEW_FORWARD_MS: i64 = 5 * 60_000;

impl EventProcessor {
    pub fn new(store: Arc<Store>, conflicts: Arc<ConflictDetector>, alerts: Arc<AlertEngine>) -> Self {
        Self { store, conflicts, alerts }
    }

    fn validate(input: &HookEventInput) -> Result<()> {
        if input.source_app.trim().is_empty() {
            return Err(DevPulseError::Malformed("source_app is required".into()));
        }
        if input.session_id.trim().is_empty() {
            return Err(DevPulseError::Malformed("session_id is required".into()));
        }
        if !input.payload.is_object() {
            return Err(DevPulseError::Malformed("payload must be a JSON object".into()));
        }
        Ok(())
    }

    /// Clamps a caller-supplied (or missing) timestamp into
    /// `[now-24h, now+5m]`, per spec.md §4.2 step 2. Returns the clamped
    /// timestamp and whether clamping occurred (`time_skew`).
    fn clamp_timestamp(input_ts: Option<i64>, now_ms: i64) -> (i64, bool) {
        let ts = input_ts.unwrap_or(now_ms);
        let lower = now_ms - SKEW_BACKWARD_MS;
        let upper = now_ms + SKEW_FORWARD_MS;
        if ts < lower {
            (lower, true)
        } else if ts > upper {
            (upper, true)
        } else {
            (ts, false)
        }
    }

    /// Runs spec.md §4.2's `Ingest(e)` algorithm end to end.
    pub async fn ingest(&self, mut input: HookEventInput, now_ms: i64) -> Result<IngestResult> {
        Self::validate(&input)?;
        let (timestamp, time_skew) = Self::clamp_timestamp(input.timestamp, now_ms);
        input.timestamp = Some(timestamp);

        let event_type = input.hook_event_type;
        let is_tool_outcome = matches!(
            event_type,
            HookEventType::PostToolUse | HookEventType::PostToolUseFailure
        );
        let success = event_type == HookEventType::PostToolUse;

        let outcome = self.store.ingest(input, timestamp, time_skew).await?;

        if is_tool_outcome {
            self.alerts.record_tool_outcome(timestamp, success);
        }

        let tracks_file_access = matches!(event_type, HookEventType::PreToolUse | HookEventType::PostToolUse);
        let conflict = if let Some((file_path, access_type)) = &outcome.file_access {
            if tracks_file_access {
                let agent_id = outcome.session.agent_id();
                self.conflicts
                    .record_access(file_path, &outcome.session.project_name, &agent_id, *access_type, timestamp)
            } else {
                None
            }
        } else {
            None
        };

        let conflict_row = if let Some(update) = conflict {
            let severity = update.severity;
            match update.existing_id {
                Some(id) => {
                    self.store.update_conflict(id, severity, update.accesses.clone()).await?;
                    Some(FileConflict {
                        id,
                        file_path: update.file_path,
                        severity,
                        detected_at: timestamp,
                        projects: update.accesses,
                        dismissed: false,
                        is_package_manifest: update.is_package_manifest,
                    })
                }
                None => {
                    let id = self
                        .store
                        .insert_conflict(FileConflict {
                            id: 0,
                            file_path: update.file_path.clone(),
                            severity,
                            detected_at: timestamp,
                            projects: update.accesses.clone(),
                            dismissed: false,
                            is_package_manifest: update.is_package_manifest,
                        })
                        .await?;
                    self.conflicts.set_row_id(&update.file_path, id);
                    Some(FileConflict {
                        id,
                        file_path: update.file_path,
                        severity,
                        detected_at: timestamp,
                        projects: update.accesses,
                        dismissed: false,
                        is_package_manifest: update.is_package_manifest,
                    })
                }
            }
        } else {
            None
        };

        Ok(IngestResult {
            event: outcome.event,
            session: outcome.session,
            project: outcome.project,
            devlog: outcome.devlog,
            conflict: conflict_row,
        })
    }
}

/// Builds the agent topology (spec.md §9): nodes keyed by `agent_id`, edges
/// implied by `parent_id`. Pure projection over the current session set.
pub fn topology(sessions: &[Session]) -> Vec<AgentNode> {
    sessions
        .iter()
        .map(|s| AgentNode {
            agent_id: s.agent_id(),
            parent_id: s.parent_id.clone(),
            project_name: s.project_name.clone(),
            model_name: s.model_name.clone(),
            status: s.status,
            task_context: s.task_context.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_in_range_timestamps() {
        let now = 1_000_000;
        let (ts, skew) = EventProcessor::clamp_timestamp(Some(now - 1_000), now);
        assert_eq!(ts, now - 1_000);
        assert!(!skew);
    }

    #[test]
    fn clamp_flags_far_past_timestamps() {
        let now = 100 * 24 * 3_600_000;
        let (ts, skew) = EventProcessor::clamp_timestamp(Some(0), now);
        assert_eq!(ts, now - SKEW_BACKWARD_MS);
        assert!(skew);
    }

    #[test]
    fn clamp_flags_far_future_timestamps() {
        let now = 1_000_000;
        let (ts, skew) = EventProcessor::clamp_timestamp(Some(now + 3_600_000), now);
        assert_eq!(ts, now + SKEW_FORWARD_MS);
        assert!(skew);
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let now = 1_000_000;
        let (ts, skew) = EventProcessor::clamp_timestamp(None, now);
        assert_eq!(ts, now);
        assert!(!skew);
    }
}
