//! Pure functions implementing the session state machine and the session/
//! project/devlog deltas a single ingested event produces (spec.md §4.2).
//! No I/O: the store calls these from inside its write transaction so the
//! whole update is applied atomically.

use serde_json::Value;

use crate::types::{
    AccessType, DevLog, HookEvent, HookEventType, Project, Session, SessionStatus, TestStatus,
};

/// Builds the initial `Session` row for a key's first event.
pub fn new_session(event: &HookEvent, project_name: String) -> Session {
    let status = match event.hook_event_type {
        HookEventType::Notification => SessionStatus::Waiting,
        _ => SessionStatus::Active,
    };
    Session {
        session_id: event.session_id.clone(),
        source_app: event.source_app.clone(),
        project_name,
        status,
        current_branch: branch_from_payload(&event.payload),
        started_at: event.timestamp,
        last_event_at: event.timestamp,
        event_count: 1,
        model_name: event.model_name.clone(),
        cwd: cwd_from_payload(&event.payload),
        task_context: task_context_from_payload(&event.payload),
        compaction_count: 0,
        last_compaction_at: None,
        compaction_history: Vec::new(),
        parent_id: parent_id_from_payload(&event.payload),
        tool_use_count: 0,
        tool_failure_count: 0,
    }
}

/// Applies one event to an existing session, per the transition table in
/// spec.md §4.2. `stopped` is a terminal state: later events are still
/// recorded (by the caller, as rows) but never revive the session.
pub fn apply_event(mut session: Session, event: &HookEvent) -> Session {
    session.event_count += 1;
    session.last_event_at = event.timestamp;

    if session.model_name.is_none() {
        session.model_name = event.model_name.clone();
    }
    if let Some(branch) = branch_from_payload(&event.payload) {
        session.current_branch = Some(branch);
    }
    if let Some(cwd) = cwd_from_payload(&event.payload) {
        session.cwd = Some(cwd);
    }
    if let Some(ctx) = task_context_from_payload(&event.payload) {
        session.task_context = Some(ctx);
    }

    match event.hook_event_type {
        HookEventType::Compaction => {
            session.compaction_count += 1;
            session.last_compaction_at = Some(event.timestamp);
            session.compaction_history.push(event.timestamp);
        }
        HookEventType::PostToolUse => session.tool_use_count += 1,
        HookEventType::PostToolUseFailure => session.tool_failure_count += 1,
        _ => {}
    }

    if session.status == SessionStatus::Stopped {
        return session;
    }

    session.status = if event.hook_event_type.closes_session() {
        SessionStatus::Stopped
    } else if event.hook_event_type == HookEventType::Notification {
        SessionStatus::Waiting
    } else {
        SessionStatus::Active
    };

    session
}

/// Derives/updates a project row from the session that just changed.
pub fn apply_project(project: Option<Project>, session: &Session, now_ms: i64) -> Project {
    let mut project = project.unwrap_or_else(|| Project {
        name: session.project_name.clone(),
        current_branch: None,
        active_sessions: 0,
        last_activity: now_ms,
        test_status: TestStatus::Unknown,
        test_summary: None,
        dev_servers: Vec::new(),
        deployment_status: None,
        github_status: None,
        health_score: 60.0,
        health_trend: 0,
    });

    project.last_activity = session.last_event_at.max(project.last_activity);
    if let Some(branch) = &session.current_branch {
        project.current_branch = Some(branch.clone());
    }
    project
}

/// Builds the `DevLog` row written when a session transitions to `stopped`.
pub fn build_devlog(
    session: &Session,
    tool_breakdown: std::collections::BTreeMap<String, i64>,
    files_changed: Vec<String>,
    commits: Vec<String>,
) -> DevLog {
    let duration_minutes = ((session.last_event_at - session.started_at).max(0) as f64) / 60_000.0;
    DevLog {
        id: 0,
        session_id: session.session_id.clone(),
        source_app: session.source_app.clone(),
        project_name: session.project_name.clone(),
        branch: session.current_branch.clone(),
        started_at: session.started_at,
        ended_at: session.last_event_at,
        duration_minutes,
        event_count: session.event_count,
        summary: None,
        files_changed,
        commits,
        tool_breakdown,
    }
}

pub fn branch_from_payload(payload: &Value) -> Option<String> {
    payload
        .get("current_branch")
        .and_then(|v| v.as_str())
        .map(String::from)
}

pub fn cwd_from_payload(payload: &Value) -> Option<String> {
    payload.get("cwd").and_then(|v| v.as_str()).map(String::from)
}

pub fn task_context_from_payload(payload: &Value) -> Option<Value> {
    payload.get("task_context").cloned()
}

pub fn parent_id_from_payload(payload: &Value) -> Option<String> {
    payload
        .get("parent_id")
        .and_then(|v| v.as_str())
        .map(String::from)
}

pub fn project_name_from_payload(payload: &Value) -> Option<String> {
    payload
        .get("project_name")
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// Extracts a `(file_path, access_type, tool_name)` triple from a
/// `PreToolUse`/`PostToolUse` payload when the tool is one the Conflict
/// Detector tracks (`Read`/`Write`/`Edit`). Returns `None` for tools it
/// doesn't track or payloads missing a `file_path`.
pub fn file_access_from_payload(payload: &Value) -> Option<(String, AccessType)> {
    let tool_name = payload.get("tool_name").and_then(|v| v.as_str())?;
    let file_path = payload.get("file_path").and_then(|v| v.as_str())?;
    let access_type = match tool_name {
        "Write" | "Edit" => AccessType::Write,
        "Read" => AccessType::Read,
        _ => return None,
    };
    Some((file_path.to_string(), access_type))
}

/// Extracts the git commit command from a `Bash` tool payload, if the
/// command invokes `git commit`. Used to populate `DevLog.commits`.
pub fn commit_from_payload(payload: &Value) -> Option<String> {
    let tool_name = payload.get("tool_name").and_then(|v| v.as_str())?;
    if tool_name != "Bash" {
        return None;
    }
    let command = payload.get("command").and_then(|v| v.as_str())?;
    if command.contains("git commit") {
        Some(command.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HookEventType;
    use serde_json::json;

    fn event(ty: HookEventType, ts: i64, payload: Value) -> HookEvent {
        HookEvent {
            id: 1,
            source_app: "app1".into(),
            session_id: "s1".into(),
            hook_event_type: ty,
            payload,
            summary: None,
            model_name: None,
            timestamp: ts,
            time_skew: false,
        }
    }

    #[test]
    fn first_event_notification_starts_waiting() {
        let e = event(HookEventType::Notification, 1000, json!({}));
        let s = new_session(&e, "proj".into());
        assert_eq!(s.status, SessionStatus::Waiting);
    }

    #[test]
    fn first_event_activity_starts_active() {
        let e = event(HookEventType::SessionStart, 1000, json!({}));
        let s = new_session(&e, "proj".into());
        assert_eq!(s.status, SessionStatus::Active);
    }

    #[test]
    fn stop_transitions_to_stopped_and_is_terminal() {
        let e = event(HookEventType::SessionStart, 1000, json!({}));
        let s = new_session(&e, "proj".into());
        let stop = event(HookEventType::Stop, 2000, json!({}));
        let s = apply_event(s, &stop);
        assert_eq!(s.status, SessionStatus::Stopped);

        let later = event(HookEventType::UserPromptSubmit, 3000, json!({}));
        let s = apply_event(s, &later);
        assert_eq!(s.status, SessionStatus::Stopped);
        assert_eq!(s.event_count, 3);
    }

    #[test]
    fn compaction_updates_history() {
        let e = event(HookEventType::SessionStart, 1000, json!({}));
        let s = new_session(&e, "proj".into());
        let c = event(HookEventType::Compaction, 2000, json!({}));
        let s = apply_event(s, &c);
        assert_eq!(s.compaction_count, 1);
        assert_eq!(s.compaction_history, vec![2000]);
    }

    #[test]
    fn tool_counters_increment() {
        let e = event(HookEventType::SessionStart, 1000, json!({}));
        let mut s = new_session(&e, "proj".into());
        for _ in 0..8 {
            s = apply_event(s, &event(HookEventType::PostToolUse, 1100, json!({})));
        }
        for _ in 0..2 {
            s = apply_event(s, &event(HookEventType::PostToolUseFailure, 1100, json!({})));
        }
        assert_eq!(s.tool_use_count, 8);
        assert_eq!(s.tool_failure_count, 2);
    }
}
