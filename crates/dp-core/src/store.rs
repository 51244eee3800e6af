//! The Store component (spec.md §4.1): an embedded SQLite database holding
//! events, sessions, projects, dev logs, conflicts, webhooks, and settings.
//! All writes are serialized through the single `tokio_rusqlite::Connection`;
//! reads run concurrently against the same handle (the driver internally
//! owns one blocking task per connection, matching the teacher's
//! `CacheDb` in `at-core/src/cache.rs`).

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio_rusqlite::Connection;

use crate::error::{DevPulseError, Result};
use crate::machine;
use crate::types::*;

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA busy_timeout=5000;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_app TEXT NOT NULL,
    session_id TEXT NOT NULL,
    hook_event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    summary TEXT,
    model_name TEXT,
    timestamp INTEGER NOT NULL,
    time_skew INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(hook_event_type);

CREATE TABLE IF NOT EXISTS sessions (
    source_app TEXT NOT NULL,
    session_id TEXT NOT NULL,
    project_name TEXT NOT NULL,
    status TEXT NOT NULL,
    current_branch TEXT,
    started_at INTEGER NOT NULL,
    last_event_at INTEGER NOT NULL,
    event_count INTEGER NOT NULL,
    model_name TEXT,
    cwd TEXT,
    task_context TEXT,
    compaction_count INTEGER NOT NULL DEFAULT 0,
    last_compaction_at INTEGER,
    compaction_history TEXT NOT NULL DEFAULT '[]',
    parent_id TEXT,
    tool_use_count INTEGER NOT NULL DEFAULT 0,
    tool_failure_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source_app, session_id)
);
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_name, last_event_at);

CREATE TABLE IF NOT EXISTS projects (
    name TEXT PRIMARY KEY,
    current_branch TEXT,
    active_sessions INTEGER NOT NULL DEFAULT 0,
    last_activity INTEGER NOT NULL,
    test_status TEXT NOT NULL DEFAULT 'unknown',
    test_summary TEXT,
    dev_servers TEXT NOT NULL DEFAULT '[]',
    deployment_status TEXT,
    github_status TEXT,
    health_score REAL NOT NULL DEFAULT 60.0,
    health_trend INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_projects_ended ON projects(name, last_activity);

CREATE TABLE IF NOT EXISTS devlogs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    source_app TEXT NOT NULL,
    project_name TEXT NOT NULL,
    branch TEXT,
    started_at INTEGER NOT NULL,
    ended_at INTEGER NOT NULL,
    duration_minutes REAL NOT NULL,
    event_count INTEGER NOT NULL,
    summary TEXT,
    files_changed TEXT NOT NULL DEFAULT '[]',
    commits TEXT NOT NULL DEFAULT '[]',
    tool_breakdown TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_devlogs_project ON devlogs(project_name, ended_at);

CREATE TABLE IF NOT EXISTS conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    severity TEXT NOT NULL,
    detected_at INTEGER NOT NULL,
    projects TEXT NOT NULL,
    dismissed INTEGER NOT NULL DEFAULT 0,
    is_package_manifest INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_conflicts_path ON conflicts(file_path);

CREATE TABLE IF NOT EXISTS webhooks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    secret TEXT,
    event_types TEXT NOT NULL DEFAULT '[]',
    project_filter TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    trigger_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_status INTEGER,
    last_error TEXT,
    last_triggered_at INTEGER
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn enum_to_sql<T: Serialize>(value: &T) -> String {
    let raw = serde_json::to_string(value).unwrap_or_default();
    raw.trim_matches('"').to_string()
}

fn enum_from_sql<T: DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn json_col<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn json_parse<T: DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub source_app: Option<String>,
    pub session_id: Option<String>,
    pub hook_event_type: Option<HookEventType>,
    pub since: Option<i64>,
}

/// Outcome of `Store::ingest`: the rows that changed, for the Event
/// Processor to turn into broadcast notifications and a webhook dispatch.
pub struct IngestOutcome {
    pub event: HookEvent,
    pub session: Session,
    pub project: Project,
    pub devlog: Option<DevLog>,
    pub file_access: Option<(String, AccessType)>,
}

pub struct CleanupReport {
    pub events_deleted: u64,
    pub events_archived: u64,
    pub devlogs_deleted: u64,
    pub devlogs_archived: u64,
    pub sessions_deleted: u64,
    pub sessions_archived: u64,
    pub archive_files: Vec<String>,
    pub db_size_before: u64,
    pub db_size_after: u64,
}

#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(|e| DevPulseError::StoreUnavailable(e.to_string()))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DevPulseError::StoreUnavailable(e.to_string()))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Appends a validated event and applies every derived update inside a
    /// single transaction (spec.md §4.2 step 3). `now_ms`/`idle_after_ms`
    /// are not needed here (lazy idle is read-time only); they stay out of
    /// this signature on purpose.
    pub async fn ingest(&self, input: HookEventInput, timestamp: i64, time_skew: bool) -> Result<IngestOutcome> {
        let project_name = machine::project_name_from_payload(&input.payload)
            .unwrap_or_else(|| input.source_app.clone());

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let event_type_sql = enum_to_sql(&input.hook_event_type);
                tx.execute(
                    "INSERT INTO events (source_app, session_id, hook_event_type, payload, summary, model_name, timestamp, time_skew)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        input.source_app,
                        input.session_id,
                        event_type_sql,
                        input.payload.to_string(),
                        input.summary,
                        input.model_name,
                        timestamp,
                        time_skew as i64,
                    ],
                )?;
                let event_id = tx.last_insert_rowid();

                let event = HookEvent {
                    id: event_id,
                    source_app: input.source_app.clone(),
                    session_id: input.session_id.clone(),
                    hook_event_type: input.hook_event_type,
                    payload: input.payload.clone(),
                    summary: input.summary.clone(),
                    model_name: input.model_name.clone(),
                    timestamp,
                    time_skew,
                };

                let existing_session = tx
                    .query_row(
                        "SELECT source_app, session_id, project_name, status, current_branch, started_at,
                                last_event_at, event_count, model_name, cwd, task_context, compaction_count,
                                last_compaction_at, compaction_history, parent_id, tool_use_count, tool_failure_count
                         FROM sessions WHERE source_app = ?1 AND session_id = ?2",
                        params![event.source_app, event.session_id],
                        row_to_session,
                    )
                    .optional()?;

                let session = match existing_session {
                    Some(s) => machine::apply_event(s, &event),
                    None => machine::new_session(&event, project_name.clone()),
                };

                tx.execute(
                    "INSERT INTO sessions (source_app, session_id, project_name, status, current_branch, started_at,
                                           last_event_at, event_count, model_name, cwd, task_context, compaction_count,
                                           last_compaction_at, compaction_history, parent_id, tool_use_count, tool_failure_count)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
                     ON CONFLICT(source_app, session_id) DO UPDATE SET
                        project_name=excluded.project_name, status=excluded.status, current_branch=excluded.current_branch,
                        last_event_at=excluded.last_event_at, event_count=excluded.event_count, model_name=excluded.model_name,
                        cwd=excluded.cwd, task_context=excluded.task_context, compaction_count=excluded.compaction_count,
                        last_compaction_at=excluded.last_compaction_at, compaction_history=excluded.compaction_history,
                        parent_id=excluded.parent_id, tool_use_count=excluded.tool_use_count, tool_failure_count=excluded.tool_failure_count",
                    params![
                        session.source_app,
                        session.session_id,
                        session.project_name,
                        enum_to_sql(&session.status),
                        session.current_branch,
                        session.started_at,
                        session.last_event_at,
                        session.event_count,
                        session.model_name,
                        session.cwd,
                        session.task_context.as_ref().map(json_col),
                        session.compaction_count,
                        session.last_compaction_at,
                        json_col(&session.compaction_history),
                        session.parent_id,
                        session.tool_use_count,
                        session.tool_failure_count,
                    ],
                )?;

                let active_sessions: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM sessions WHERE project_name = ?1 AND status != 'stopped'",
                    params![session.project_name],
                    |row| row.get(0),
                )?;

                let existing_project = tx
                    .query_row(
                        "SELECT name, current_branch, active_sessions, last_activity, test_status, test_summary,
                                dev_servers, deployment_status, github_status, health_score, health_trend
                         FROM projects WHERE name = ?1",
                        params![session.project_name],
                        row_to_project,
                    )
                    .optional()?;

                let mut project = machine::apply_project(existing_project, &session, timestamp);
                project.active_sessions = active_sessions;

                tx.execute(
                    "INSERT INTO projects (name, current_branch, active_sessions, last_activity, test_status, test_summary,
                                            dev_servers, deployment_status, github_status, health_score, health_trend)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
                     ON CONFLICT(name) DO UPDATE SET
                        current_branch=excluded.current_branch, active_sessions=excluded.active_sessions,
                        last_activity=excluded.last_activity",
                    params![
                        project.name,
                        project.current_branch,
                        project.active_sessions,
                        project.last_activity,
                        enum_to_sql(&project.test_status),
                        project.test_summary,
                        json_col(&project.dev_servers),
                        project.deployment_status.as_ref().map(json_col),
                        project.github_status.as_ref().map(json_col),
                        project.health_score,
                        project.health_trend,
                    ],
                )?;

                let devlog = if session.status == SessionStatus::Stopped {
                    let mut breakdown: BTreeMap<String, i64> = BTreeMap::new();
                    let mut files_changed: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
                    let mut commits: Vec<String> = Vec::new();
                    {
                        let mut stmt = tx.prepare(
                            "SELECT payload FROM events WHERE source_app = ?1 AND session_id = ?2 AND hook_event_type = 'PostToolUse'",
                        )?;
                        let mut rows = stmt.query(params![session.source_app, session.session_id])?;
                        while let Some(row) = rows.next()? {
                            let payload_raw: String = row.get(0)?;
                            if let Ok(v) = serde_json::from_str::<Value>(&payload_raw) {
                                if let Some(tool) = v.get("tool_name").and_then(|t| t.as_str()) {
                                    *breakdown.entry(tool.to_string()).or_insert(0) += 1;
                                }
                                if let Some((file_path, AccessType::Write)) = machine::file_access_from_payload(&v) {
                                    files_changed.insert(file_path);
                                }
                                if let Some(commit) = machine::commit_from_payload(&v) {
                                    commits.push(commit);
                                }
                            }
                        }
                    }
                    let already_logged: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM devlogs WHERE source_app = ?1 AND session_id = ?2",
                        params![session.source_app, session.session_id],
                        |row| row.get(0),
                    )?;
                    if already_logged == 0 {
                        let log = machine::build_devlog(&session, breakdown, files_changed.into_iter().collect(), commits);
                        tx.execute(
                            "INSERT INTO devlogs (session_id, source_app, project_name, branch, started_at, ended_at,
                                                   duration_minutes, event_count, summary, files_changed, commits, tool_breakdown)
                             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                            params![
                                log.session_id,
                                log.source_app,
                                log.project_name,
                                log.branch,
                                log.started_at,
                                log.ended_at,
                                log.duration_minutes,
                                log.event_count,
                                log.summary,
                                json_col(&log.files_changed),
                                json_col(&log.commits),
                                json_col(&log.tool_breakdown),
                            ],
                        )?;
                        let id = tx.last_insert_rowid();
                        Some(DevLog { id, ..log })
                    } else {
                        None
                    }
                } else {
                    None
                };

                let file_access = machine::file_access_from_payload(&event.payload);

                tx.commit()?;

                Ok(IngestOutcome {
                    event,
                    session,
                    project,
                    devlog,
                    file_access,
                })
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn list_events(&self, filter: EventFilter, limit: usize) -> Result<Vec<HookEvent>> {
        self.conn
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT id, source_app, session_id, hook_event_type, payload, summary, model_name, timestamp, time_skew FROM events WHERE 1=1",
                );
                let mut binds: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
                if let Some(app) = &filter.source_app {
                    sql.push_str(" AND source_app = ?");
                    binds.push(Box::new(app.clone()));
                }
                if let Some(sid) = &filter.session_id {
                    sql.push_str(" AND session_id = ?");
                    binds.push(Box::new(sid.clone()));
                }
                if let Some(ty) = &filter.hook_event_type {
                    sql.push_str(" AND hook_event_type = ?");
                    binds.push(Box::new(enum_to_sql(ty)));
                }
                if let Some(since) = filter.since {
                    sql.push_str(" AND timestamp >= ?");
                    binds.push(Box::new(since));
                }
                sql.push_str(" ORDER BY timestamp ASC, id ASC LIMIT ?");
                binds.push(Box::new(limit as i64));

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    binds.iter().map(|b| b.as_ref()).collect();
                let mut rows = stmt.query(param_refs.as_slice())?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_event(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn recent_events(&self, limit: usize) -> Result<Vec<HookEvent>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, source_app, session_id, hook_event_type, payload, summary, model_name, timestamp, time_skew
                     FROM events ORDER BY timestamp DESC, id DESC LIMIT ?1",
                )?;
                let mut rows = stmt.query(params![limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_event(row)?);
                }
                out.reverse();
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn filter_options(&self) -> Result<(Vec<String>, Vec<String>, Vec<String>)> {
        self.conn
            .call(|conn| {
                let apps = distinct_strings(conn, "SELECT DISTINCT source_app FROM events ORDER BY source_app")?;
                let sessions = distinct_strings(conn, "SELECT DISTINCT session_id FROM events ORDER BY session_id")?;
                let types = distinct_strings(conn, "SELECT DISTINCT hook_event_type FROM events ORDER BY hook_event_type")?;
                Ok((apps, sessions, types))
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT source_app, session_id, project_name, status, current_branch, started_at, last_event_at,
                            event_count, model_name, cwd, task_context, compaction_count, last_compaction_at,
                            compaction_history, parent_id, tool_use_count, tool_failure_count
                     FROM sessions ORDER BY last_event_at DESC",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_session(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn get_session(&self, source_app: String, session_id: String) -> Result<Option<Session>> {
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT source_app, session_id, project_name, status, current_branch, started_at, last_event_at,
                            event_count, model_name, cwd, task_context, compaction_count, last_compaction_at,
                            compaction_history, parent_id, tool_use_count, tool_failure_count
                     FROM sessions WHERE source_app = ?1 AND session_id = ?2",
                    params![source_app, session_id],
                    row_to_session,
                )
                .optional()
                .map_err(Into::into)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, current_branch, active_sessions, last_activity, test_status, test_summary,
                            dev_servers, deployment_status, github_status, health_score, health_trend
                     FROM projects ORDER BY last_activity DESC",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_project(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn get_project(&self, name: String) -> Result<Option<Project>> {
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT name, current_branch, active_sessions, last_activity, test_status, test_summary,
                            dev_servers, deployment_status, github_status, health_score, health_trend
                     FROM projects WHERE name = ?1",
                    params![name],
                    row_to_project,
                )
                .optional()
                .map_err(Into::into)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn update_project_health(&self, name: String, score: f64, trend: i32, test_status: TestStatus) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE projects SET health_score = ?1, health_trend = ?2, test_status = ?3 WHERE name = ?4",
                    params![score, trend, enum_to_sql(&test_status), name],
                )?;
                Ok(())
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn list_devlogs(&self, limit: usize, project: Option<String>) -> Result<Vec<DevLog>> {
        self.conn
            .call(move |conn| {
                let (sql, params_vec): (&str, Vec<Box<dyn rusqlite::types::ToSql>>) = if let Some(p) = project.clone() {
                    (
                        "SELECT id, session_id, source_app, project_name, branch, started_at, ended_at, duration_minutes,
                                event_count, summary, files_changed, commits, tool_breakdown
                         FROM devlogs WHERE project_name = ?1 ORDER BY ended_at DESC LIMIT ?2",
                        vec![Box::new(p), Box::new(limit as i64)],
                    )
                } else {
                    (
                        "SELECT id, session_id, source_app, project_name, branch, started_at, ended_at, duration_minutes,
                                event_count, summary, files_changed, commits, tool_breakdown
                         FROM devlogs ORDER BY ended_at DESC LIMIT ?1",
                        vec![Box::new(limit as i64)],
                    )
                };
                let mut stmt = conn.prepare(sql)?;
                let refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
                let mut rows = stmt.query(refs.as_slice())?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_devlog(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn insert_conflict(&self, conflict: FileConflict) -> Result<i64> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO conflicts (file_path, severity, detected_at, projects, dismissed, is_package_manifest)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    params![
                        conflict.file_path,
                        enum_to_sql(&conflict.severity),
                        conflict.detected_at,
                        json_col(&conflict.projects),
                        conflict.dismissed as i64,
                        conflict.is_package_manifest as i64,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn update_conflict(&self, id: i64, severity: ConflictSeverity, projects: Vec<ConflictAccess>) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE conflicts SET severity = ?1, projects = ?2, dismissed = 0 WHERE id = ?3",
                    params![enum_to_sql(&severity), json_col(&projects), id],
                )?;
                Ok(())
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn dismiss_conflict(&self, id: i64) -> Result<bool> {
        self.conn
            .call(move |conn| {
                let changed = conn.execute("UPDATE conflicts SET dismissed = 1 WHERE id = ?1", params![id])?;
                Ok(changed > 0)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn list_active_conflicts(&self, window_minutes: i64, now_ms: i64) -> Result<Vec<FileConflict>> {
        self.conn
            .call(move |conn| {
                let since = now_ms - window_minutes * 60_000;
                let mut stmt = conn.prepare(
                    "SELECT id, file_path, severity, detected_at, projects, dismissed, is_package_manifest
                     FROM conflicts WHERE dismissed = 0 AND detected_at >= ?1 ORDER BY detected_at DESC",
                )?;
                let mut rows = stmt.query(params![since])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_conflict(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn insert_webhook(&self, webhook: Webhook) -> Result<i64> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO webhooks (name, url, secret, event_types, project_filter, active, trigger_count, failure_count, last_status, last_error, last_triggered_at)
                     VALUES (?1,?2,?3,?4,?5,?6,0,0,NULL,NULL,NULL)",
                    params![
                        webhook.name,
                        webhook.url,
                        webhook.secret,
                        json_col(&webhook.event_types),
                        webhook.project_filter,
                        webhook.active as i64,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn update_webhook(&self, id: i64, webhook: Webhook) -> Result<bool> {
        self.conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE webhooks SET name=?1, url=?2, secret=?3, event_types=?4, project_filter=?5, active=?6 WHERE id=?7",
                    params![
                        webhook.name,
                        webhook.url,
                        webhook.secret,
                        json_col(&webhook.event_types),
                        webhook.project_filter,
                        webhook.active as i64,
                        id,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn delete_webhook(&self, id: i64) -> Result<bool> {
        self.conn
            .call(move |conn| Ok(conn.execute("DELETE FROM webhooks WHERE id = ?1", params![id])? > 0))
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn record_webhook_attempt(&self, id: i64, status: Option<u16>, error: Option<String>, success: bool, now_ms: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                if success {
                    conn.execute(
                        "UPDATE webhooks SET trigger_count = trigger_count + 1, last_status = ?1, last_error = ?2, last_triggered_at = ?3 WHERE id = ?4",
                        params![status.map(|s| s as i64), error, now_ms, id],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE webhooks SET failure_count = failure_count + 1, last_status = ?1, last_error = ?2, last_triggered_at = ?3 WHERE id = ?4",
                        params![status.map(|s| s as i64), error, now_ms, id],
                    )?;
                }
                Ok(())
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, url, secret, event_types, project_filter, active, trigger_count, failure_count, last_status, last_error, last_triggered_at
                     FROM webhooks ORDER BY id",
                )?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_webhook(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn get_webhook(&self, id: i64) -> Result<Option<Webhook>> {
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, name, url, secret, event_types, project_filter, active, trigger_count, failure_count, last_status, last_error, last_triggered_at
                     FROM webhooks WHERE id = ?1",
                    params![id],
                    row_to_webhook,
                )
                .optional()
                .map_err(Into::into)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn get_setting(&self, key: String) -> Result<Option<String>> {
        self.conn
            .call(move |conn| {
                conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()
                    .map_err(Into::into)
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn set_setting(&self, key: String, value: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
                Ok(())
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn list_settings(&self) -> Result<Vec<Setting>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(Setting {
                        key: row.get(0)?,
                        value: row.get(1)?,
                    });
                }
                Ok(out)
            })
            .await
            .map_err(DevPulseError::from)
    }

    /// Simple full-text-ish scan per spec.md §4.1: `LIKE`-style matching,
    /// capped, recency-ordered, not ranked.
    pub async fn search(&self, query: String, scope: EventFilterScope, limit: usize) -> Result<(Vec<HookEvent>, Vec<Session>, Vec<DevLog>)> {
        if query.trim().is_empty() {
            return Ok((Vec::new(), Vec::new(), Vec::new()));
        }
        let like = format!("%{}%", query.replace('%', "").replace('_', ""));
        self.conn
            .call(move |conn| {
                let mut events = Vec::new();
                if matches!(scope, EventFilterScope::Events | EventFilterScope::All) {
                    let mut stmt = conn.prepare(
                        "SELECT id, source_app, session_id, hook_event_type, payload, summary, model_name, timestamp, time_skew
                         FROM events WHERE summary LIKE ?1 OR payload LIKE ?1 ORDER BY timestamp DESC LIMIT ?2",
                    )?;
                    let mut rows = stmt.query(params![like, limit as i64])?;
                    while let Some(row) = rows.next()? {
                        events.push(row_to_event(row)?);
                    }
                }
                let mut sessions = Vec::new();
                if matches!(scope, EventFilterScope::Sessions | EventFilterScope::All) {
                    let mut stmt = conn.prepare(
                        "SELECT source_app, session_id, project_name, status, current_branch, started_at, last_event_at,
                                event_count, model_name, cwd, task_context, compaction_count, last_compaction_at,
                                compaction_history, parent_id, tool_use_count, tool_failure_count
                         FROM sessions WHERE session_id LIKE ?1 OR project_name LIKE ?1 ORDER BY last_event_at DESC LIMIT ?2",
                    )?;
                    let mut rows = stmt.query(params![like, limit as i64])?;
                    while let Some(row) = rows.next()? {
                        sessions.push(row_to_session(row)?);
                    }
                }
                let mut devlogs = Vec::new();
                if matches!(scope, EventFilterScope::Devlogs | EventFilterScope::All) {
                    let mut stmt = conn.prepare(
                        "SELECT id, session_id, source_app, project_name, branch, started_at, ended_at, duration_minutes,
                                event_count, summary, files_changed, commits, tool_breakdown
                         FROM devlogs WHERE summary LIKE ?1 OR project_name LIKE ?1 ORDER BY ended_at DESC LIMIT ?2",
                    )?;
                    let mut rows = stmt.query(params![like, limit as i64])?;
                    while let Some(row) = rows.next()? {
                        devlogs.push(row_to_devlog(row)?);
                    }
                }
                Ok((events, sessions, devlogs))
            })
            .await
            .map_err(DevPulseError::from)
    }

    /// Heatmap cells: per-`(day, hour)` event counts over the last `days`
    /// days, optionally restricted to one project.
    pub async fn heatmap(&self, days: i64, project: Option<String>) -> Result<Vec<(String, u32, i64)>> {
        self.conn
            .call(move |conn| {
                let sql = if project.is_some() {
                    "SELECT e.timestamp FROM events e JOIN sessions s ON s.source_app = e.source_app AND s.session_id = e.session_id
                     WHERE s.project_name = ?1"
                } else {
                    "SELECT timestamp FROM events"
                };
                let mut stmt = conn.prepare(sql)?;
                let mut rows = if let Some(p) = &project {
                    stmt.query(params![p])?
                } else {
                    stmt.query([])?
                };
                let mut counts: BTreeMap<(String, u32), i64> = BTreeMap::new();
                let cutoff_days = days;
                while let Some(row) = rows.next()? {
                    let ts: i64 = row.get(0)?;
                    let dt = DateTime::<Utc>::from_timestamp_millis(ts).unwrap_or_else(|| Utc::now());
                    let day = dt.format("%Y-%m-%d").to_string();
                    let hour = dt.format("%H").to_string().parse::<u32>().unwrap_or(0);
                    *counts.entry((day, hour)).or_insert(0) += 1;
                }
                let _ = cutoff_days;
                Ok(counts.into_iter().map(|((d, h), c)| (d, h, c)).collect())
            })
            .await
            .map_err(DevPulseError::from)
    }

    /// Runs one retention cleanup tick (spec.md §4.7).
    pub async fn cleanup(
        &self,
        events_days: i64,
        devlogs_days: i64,
        sessions_days: i64,
        archive_enabled: bool,
        now_ms: i64,
    ) -> Result<(CleanupReport, Vec<(String, String)>)> {
        let events_cutoff = now_ms - events_days * 86_400_000;
        let devlogs_cutoff = now_ms - devlogs_days * 86_400_000;
        let sessions_cutoff = now_ms - sessions_days * 86_400_000;

        self.conn
            .call(move |conn| {
                let db_size_before = db_page_bytes(conn)?;
                let mut archive_payloads: Vec<(String, String)> = Vec::new();

                let tx = conn.transaction()?;

                let events_json = if archive_enabled {
                    collect_json(&tx, "SELECT * FROM events WHERE timestamp < ?1", params![events_cutoff])?
                } else {
                    String::new()
                };
                let events_deleted = tx.execute("DELETE FROM events WHERE timestamp < ?1", params![events_cutoff])? as u64;
                if archive_enabled && events_deleted > 0 {
                    archive_payloads.push(("events".into(), events_json));
                }

                let devlogs_json = if archive_enabled {
                    collect_json(&tx, "SELECT * FROM devlogs WHERE ended_at < ?1", params![devlogs_cutoff])?
                } else {
                    String::new()
                };
                let devlogs_deleted = tx.execute("DELETE FROM devlogs WHERE ended_at < ?1", params![devlogs_cutoff])? as u64;
                if archive_enabled && devlogs_deleted > 0 {
                    archive_payloads.push(("devlogs".into(), devlogs_json));
                }

                let sessions_json = if archive_enabled {
                    collect_json(
                        &tx,
                        "SELECT * FROM sessions WHERE status = 'stopped' AND last_event_at < ?1",
                        params![sessions_cutoff],
                    )?
                } else {
                    String::new()
                };
                let sessions_deleted = tx.execute(
                    "DELETE FROM sessions WHERE status = 'stopped' AND last_event_at < ?1",
                    params![sessions_cutoff],
                )? as u64;
                if archive_enabled && sessions_deleted > 0 {
                    archive_payloads.push(("sessions".into(), sessions_json));
                }

                tx.commit()?;
                conn.execute_batch("VACUUM;")?;
                let db_size_after = db_page_bytes(conn)?;

                let events_archived = if archive_enabled { events_deleted } else { 0 };
                let devlogs_archived = if archive_enabled { devlogs_deleted } else { 0 };
                let sessions_archived = if archive_enabled { sessions_deleted } else { 0 };

                Ok((
                    CleanupReport {
                        events_deleted,
                        events_archived,
                        devlogs_deleted,
                        devlogs_archived,
                        sessions_deleted,
                        sessions_archived,
                        archive_files: Vec::new(),
                        db_size_before,
                        db_size_after,
                    },
                    archive_payloads,
                ))
            })
            .await
            .map_err(DevPulseError::from)
    }

    pub async fn stats(&self) -> Result<(i64, i64, i64, i64, i64)> {
        self.conn
            .call(|conn| {
                let events: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
                let sessions: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
                let projects: i64 = conn.query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))?;
                let devlogs: i64 = conn.query_row("SELECT COUNT(*) FROM devlogs", [], |r| r.get(0))?;
                let webhooks: i64 = conn.query_row("SELECT COUNT(*) FROM webhooks", [], |r| r.get(0))?;
                Ok((events, sessions, projects, devlogs, webhooks))
            })
            .await
            .map_err(DevPulseError::from)
    }
}

fn db_page_bytes(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
    Ok((page_count * page_size).max(0) as u64)
}

fn collect_json(tx: &rusqlite::Transaction<'_>, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<String> {
    let mut stmt = tx.prepare(sql)?;
    let col_count = stmt.column_count();
    let col_names: Vec<String> = (0..col_count).map(|i| stmt.column_name(i).unwrap_or("").to_string()).collect();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = serde_json::Map::new();
        for (i, name) in col_names.iter().enumerate() {
            let v: Value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(n) => Value::from(n),
                rusqlite::types::ValueRef::Real(f) => Value::from(f),
                rusqlite::types::ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).to_string()),
                rusqlite::types::ValueRef::Blob(_) => Value::Null,
            };
            obj.insert(name.clone(), v);
        }
        out.push(Value::Object(obj));
    }
    Ok(serde_json::to_string(&out).unwrap_or_default())
}

fn distinct_strings(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row.get(0)?);
    }
    Ok(out)
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<HookEvent> {
    let payload_raw: String = row.get(4)?;
    let type_raw: String = row.get(3)?;
    Ok(HookEvent {
        id: row.get(0)?,
        source_app: row.get(1)?,
        session_id: row.get(2)?,
        hook_event_type: enum_from_sql(&type_raw)?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(Value::Null),
        summary: row.get(5)?,
        model_name: row.get(6)?,
        timestamp: row.get(7)?,
        time_skew: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let status_raw: String = row.get(3)?;
    let task_context_raw: Option<String> = row.get(10)?;
    let history_raw: String = row.get(13)?;
    Ok(Session {
        source_app: row.get(0)?,
        session_id: row.get(1)?,
        project_name: row.get(2)?,
        status: enum_from_sql(&status_raw)?,
        current_branch: row.get(4)?,
        started_at: row.get(5)?,
        last_event_at: row.get(6)?,
        event_count: row.get(7)?,
        model_name: row.get(8)?,
        cwd: row.get(9)?,
        task_context: task_context_raw.and_then(|s| serde_json::from_str(&s).ok()),
        compaction_count: row.get(11)?,
        last_compaction_at: row.get(12)?,
        compaction_history: json_parse(&history_raw),
        parent_id: row.get(14)?,
        tool_use_count: row.get(15)?,
        tool_failure_count: row.get(16)?,
    })
}

fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    let status_raw: String = row.get(4)?;
    let servers_raw: String = row.get(6)?;
    let deployment_raw: Option<String> = row.get(7)?;
    let github_raw: Option<String> = row.get(8)?;
    Ok(Project {
        name: row.get(0)?,
        current_branch: row.get(1)?,
        active_sessions: row.get(2)?,
        last_activity: row.get(3)?,
        test_status: enum_from_sql(&status_raw)?,
        test_summary: row.get(5)?,
        dev_servers: json_parse(&servers_raw),
        deployment_status: deployment_raw.and_then(|s| serde_json::from_str(&s).ok()),
        github_status: github_raw.and_then(|s| serde_json::from_str(&s).ok()),
        health_score: row.get(9)?,
        health_trend: row.get(10)?,
    })
}

fn row_to_devlog(row: &rusqlite::Row) -> rusqlite::Result<DevLog> {
    let files_raw: String = row.get(10)?;
    let commits_raw: String = row.get(11)?;
    let breakdown_raw: String = row.get(12)?;
    Ok(DevLog {
        id: row.get(0)?,
        session_id: row.get(1)?,
        source_app: row.get(2)?,
        project_name: row.get(3)?,
        branch: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        duration_minutes: row.get(7)?,
        event_count: row.get(8)?,
        summary: row.get(9)?,
        files_changed: json_parse(&files_raw),
        commits: json_parse(&commits_raw),
        tool_breakdown: json_parse(&breakdown_raw),
    })
}

fn row_to_conflict(row: &rusqlite::Row) -> rusqlite::Result<FileConflict> {
    let severity_raw: String = row.get(2)?;
    let projects_raw: String = row.get(4)?;
    Ok(FileConflict {
        id: row.get(0)?,
        file_path: row.get(1)?,
        severity: enum_from_sql(&severity_raw)?,
        detected_at: row.get(3)?,
        projects: json_parse(&projects_raw),
        dismissed: row.get::<_, i64>(5)? != 0,
        is_package_manifest: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_webhook(row: &rusqlite::Row) -> rusqlite::Result<Webhook> {
    let types_raw: String = row.get(4)?;
    Ok(Webhook {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        secret: row.get(3)?,
        event_types: json_parse(&types_raw),
        project_filter: row.get(5)?,
        active: row.get::<_, i64>(6)? != 0,
        trigger_count: row.get(7)?,
        failure_count: row.get(8)?,
        last_status: row.get::<_, Option<i64>>(9)?.map(|v| v as u16),
        last_error: row.get(10)?,
        last_triggered_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> Store {
        Store::open_in_memory().await.unwrap()
    }

    fn input(app: &str, session: &str, ty: HookEventType, ts: i64, payload: Value) -> HookEventInput {
        HookEventInput {
            source_app: app.into(),
            session_id: session.into(),
            hook_event_type: ty,
            payload,
            chat: None,
            summary: None,
            model_name: None,
            timestamp: Some(ts),
        }
    }

    #[tokio::test]
    async fn ingest_creates_session_and_project() {
        let s = store().await;
        let outcome = s
            .ingest(
                input("app1", "s1", HookEventType::SessionStart, 1000, json!({"project_name":"proj"})),
                1000,
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.session.status, SessionStatus::Active);
        assert_eq!(outcome.project.active_sessions, 1);

        let events = s.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, outcome.event.id);
    }

    #[tokio::test]
    async fn event_count_matches_ingested_events() {
        let s = store().await;
        for i in 0..5 {
            s.ingest(
                input("app1", "s1", HookEventType::PostToolUse, 1000 + i, json!({})),
                1000 + i,
                false,
            )
            .await
            .unwrap();
        }
        let session = s.get_session("app1".into(), "s1".into()).await.unwrap().unwrap();
        assert_eq!(session.event_count, 5);
    }

    #[tokio::test]
    async fn stop_produces_devlog_once() {
        let s = store().await;
        s.ingest(input("app1", "s1", HookEventType::SessionStart, 1000, json!({})), 1000, false)
            .await
            .unwrap();
        let outcome = s
            .ingest(input("app1", "s1", HookEventType::Stop, 2000, json!({})), 2000, false)
            .await
            .unwrap();
        assert!(outcome.devlog.is_some());

        let logs = s.list_devlogs(10, None).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn active_sessions_count_excludes_stopped() {
        let s = store().await;
        s.ingest(input("app1", "s1", HookEventType::SessionStart, 1000, json!({"project_name":"p"})), 1000, false)
            .await
            .unwrap();
        s.ingest(input("app1", "s2", HookEventType::SessionStart, 1000, json!({"project_name":"p"})), 1000, false)
            .await
            .unwrap();
        s.ingest(input("app1", "s1", HookEventType::Stop, 2000, json!({"project_name":"p"})), 2000, false)
            .await
            .unwrap();
        let project = s.get_project("p".into()).await.unwrap().unwrap();
        assert_eq!(project.active_sessions, 1);
    }

    #[tokio::test]
    async fn cleanup_deletes_old_events_only() {
        let s = store().await;
        let now = 10 * 86_400_000i64;
        s.ingest(input("app1", "s1", HookEventType::SessionStart, now - 2 * 86_400_000, json!({})), now - 2 * 86_400_000, false)
            .await
            .unwrap();
        s.ingest(input("app1", "s1", HookEventType::PostToolUse, now, json!({})), now, false)
            .await
            .unwrap();

        let (report, _) = s.cleanup(1, 90, 30, true, now).await.unwrap();
        assert_eq!(report.events_deleted, 1);
        assert_eq!(report.events_archived, 1);

        let events = s.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn search_with_empty_query_returns_empty() {
        let s = store().await;
        let (events, sessions, devlogs) = s.search(String::new(), EventFilterScope::All, 20).await.unwrap();
        assert!(events.is_empty());
        assert!(sessions.is_empty());
        assert!(devlogs.is_empty());
    }
}
