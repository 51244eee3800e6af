use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed tag set a `HookEvent` must carry in `hook_event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HookEventType {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    Notification,
    Stop,
    SessionEnd,
    SubagentStart,
    SubagentStop,
    Compaction,
}

impl HookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEventType::SessionStart => "SessionStart",
            HookEventType::UserPromptSubmit => "UserPromptSubmit",
            HookEventType::PreToolUse => "PreToolUse",
            HookEventType::PostToolUse => "PostToolUse",
            HookEventType::PostToolUseFailure => "PostToolUseFailure",
            HookEventType::Notification => "Notification",
            HookEventType::Stop => "Stop",
            HookEventType::SessionEnd => "SessionEnd",
            HookEventType::SubagentStart => "SubagentStart",
            HookEventType::SubagentStop => "SubagentStop",
            HookEventType::Compaction => "Compaction",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        let v: Self = serde_json::from_value(Value::String(s.to_string())).ok()?;
        Some(v)
    }

    /// True for the event types that close a session (`Stop`/`SessionEnd`).
    pub fn closes_session(&self) -> bool {
        matches!(self, HookEventType::Stop | HookEventType::SessionEnd)
    }

    /// True for the event types that count as "tool/prompt activity" in the
    /// session state machine (everything except `Notification` and the
    /// closing events, which have their own transitions).
    pub fn is_activity(&self) -> bool {
        !matches!(
            self,
            HookEventType::Notification | HookEventType::Stop | HookEventType::SessionEnd
        )
    }
}

impl fmt::Display for HookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raw, persisted hook event. `id` and `timestamp` are assigned by the
/// store on append; `time_skew` is set by the Event Processor when the
/// caller-supplied timestamp falls outside the clamp window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    pub id: i64,
    pub source_app: String,
    pub session_id: String,
    pub hook_event_type: HookEventType,
    pub payload: Value,
    pub summary: Option<String>,
    pub model_name: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub time_skew: bool,
}

/// Body accepted by `POST /events`. `id` is absent; `timestamp` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEventInput {
    pub source_app: String,
    pub session_id: String,
    pub hook_event_type: HookEventType,
    #[serde(default = "default_payload")]
    pub payload: Value,
    pub chat: Option<Value>,
    pub summary: Option<String>,
    pub model_name: Option<String>,
    pub timestamp: Option<i64>,
}

fn default_payload() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Waiting,
    Idle,
    Stopped,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Idle => "idle",
            SessionStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub source_app: String,
    pub project_name: String,
    pub status: SessionStatus,
    pub current_branch: Option<String>,
    pub started_at: i64,
    pub last_event_at: i64,
    pub event_count: i64,
    pub model_name: Option<String>,
    pub cwd: Option<String>,
    pub task_context: Option<Value>,
    pub compaction_count: i64,
    pub last_compaction_at: Option<i64>,
    pub compaction_history: Vec<i64>,
    pub parent_id: Option<String>,
    pub tool_use_count: i64,
    pub tool_failure_count: i64,
}

impl Session {
    pub fn key(&self) -> (String, String) {
        (self.source_app.clone(), self.session_id.clone())
    }

    pub fn agent_id(&self) -> String {
        format!("{}:{}", self.source_app, self.session_id)
    }

    /// Materializes the "lazy idle" transition from spec.md §4.2: a session
    /// in `active`/`waiting` whose `last_event_at` is stale reads as `idle`
    /// without a stored mutation.
    pub fn effective_status(&self, now_ms: i64, idle_after_ms: i64) -> SessionStatus {
        match self.status {
            SessionStatus::Active | SessionStatus::Waiting
                if now_ms - self.last_event_at >= idle_after_ms =>
            {
                SessionStatus::Idle
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passing,
    Failing,
    Unknown,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Passing => "passing",
            TestStatus::Failing => "failing",
            TestStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServer {
    pub port: u16,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub current_branch: Option<String>,
    pub active_sessions: i64,
    pub last_activity: i64,
    pub test_status: TestStatus,
    pub test_summary: Option<String>,
    pub dev_servers: Vec<DevServer>,
    pub deployment_status: Option<Value>,
    pub github_status: Option<Value>,
    pub health_score: f64,
    pub health_trend: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNode {
    pub agent_id: String,
    pub parent_id: Option<String>,
    pub project_name: String,
    pub model_name: Option<String>,
    pub status: SessionStatus,
    pub task_context: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevLog {
    pub id: i64,
    pub session_id: String,
    pub source_app: String,
    pub project_name: String,
    pub branch: Option<String>,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_minutes: f64,
    pub event_count: i64,
    pub summary: Option<String>,
    pub files_changed: Vec<String>,
    pub commits: Vec<String>,
    pub tool_breakdown: std::collections::BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictAccess {
    pub project_name: String,
    pub agent_id: String,
    pub access_type: AccessType,
    pub last_access: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConflict {
    pub id: i64,
    pub file_path: String,
    pub severity: ConflictSeverity,
    pub detected_at: i64,
    pub projects: Vec<ConflictAccess>,
    pub dismissed: bool,
    pub is_package_manifest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ErrorSpike,
    StuckSession,
    WaitingTooLong,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::ErrorSpike => "error_spike",
            AlertKind::StuckSession => "stuck_session",
            AlertKind::WaitingTooLong => "waiting_too_long",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub agent_label: String,
    pub message: String,
    pub detected_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub event_types: Vec<HookEventType>,
    pub project_filter: Option<String>,
    pub active: bool,
    pub trigger_count: i64,
    pub failure_count: i64,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
    pub last_triggered_at: Option<i64>,
}

impl Webhook {
    pub fn matches(&self, event_type: HookEventType, project_name: &str) -> bool {
        let type_ok = self.event_types.is_empty() || self.event_types.contains(&event_type);
        let project_ok = match &self.project_filter {
            None => true,
            Some(p) if p.is_empty() => true,
            Some(p) => p == project_name,
        };
        self.active && type_ok && project_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// The `{type, data}` envelope carried on the subscriber stream (spec.md §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Initial { data: InitialSnapshot },
    Event { data: HookEvent },
    Projects { data: Vec<Project> },
    Sessions { data: Vec<Session> },
    Devlogs { data: Vec<DevLog> },
    Topology { data: Vec<AgentNode> },
    Conflicts { data: Vec<FileConflict> },
    Alerts { data: Vec<Alert> },
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct InitialSnapshot {
    pub events: Vec<HookEvent>,
    pub projects: Vec<Project>,
    pub sessions: Vec<Session>,
    pub topology: Vec<AgentNode>,
    pub conflicts: Vec<FileConflict>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFilterScope {
    Events,
    Sessions,
    Devlogs,
    All,
}
