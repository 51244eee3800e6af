//! Conflict Detector (spec.md §4.4): an in-memory registry of recent file
//! accesses keyed by path, evaluated for severity after every access.

use std::collections::HashMap;
use std::sync::Mutex;

use dp_core::types::{AccessType, ConflictAccess, ConflictSeverity};

const PACKAGE_MANIFESTS: &[&str] = &[
    "package.json",
    "bun.lockb",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.toml",
    "Cargo.lock",
    "go.mod",
    "go.sum",
    "Gemfile",
    "Gemfile.lock",
    "requirements.txt",
    "poetry.lock",
    "pyproject.toml",
];

pub fn is_package_manifest(file_path: &str) -> bool {
    let base = file_path.rsplit('/').next().unwrap_or(file_path);
    PACKAGE_MANIFESTS.contains(&base)
}

#[derive(Debug, Clone)]
struct Access {
    project_name: String,
    agent_id: String,
    access_type: AccessType,
    timestamp: i64,
}

/// Result of recording one access: whether a conflict row should be
/// created (`is_new`) or updated, and at what severity. `existing_id` is
/// the database row id to update when this is an escalation of a conflict
/// already persisted; `None` means the caller must insert a new row and
/// report it back via `set_row_id`.
pub struct ConflictUpdate {
    pub file_path: String,
    pub severity: ConflictSeverity,
    pub accesses: Vec<ConflictAccess>,
    pub is_new: bool,
    pub existing_id: Option<i64>,
    pub is_package_manifest: bool,
}

struct FileState {
    accesses: Vec<Access>,
    last_severity: Option<ConflictSeverity>,
    last_agents: std::collections::HashSet<String>,
    row_id: Option<i64>,
}

pub struct ConflictDetector {
    window_minutes: i64,
    files: Mutex<HashMap<String, FileState>>,
}

impl ConflictDetector {
    pub fn new(window_minutes: i64) -> Self {
        Self {
            window_minutes,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Records one file access and returns a `ConflictUpdate` if the
    /// severity rules in spec.md §4.4 now warrant emitting or updating a
    /// row: severity escalated, or a new agent joined an existing conflict.
    /// A window of 0 minutes never emits (every access immediately expires).
    pub fn record_access(
        &self,
        file_path: &str,
        project_name: &str,
        agent_id: &str,
        access_type: AccessType,
        now_ms: i64,
    ) -> Option<ConflictUpdate> {
        if self.window_minutes <= 0 {
            return None;
        }
        let window_ms = self.window_minutes * 60_000;
        let mut files = self.files.lock().unwrap();
        let state = files.entry(file_path.to_string()).or_insert_with(|| FileState {
            accesses: Vec::new(),
            last_severity: None,
            last_agents: std::collections::HashSet::new(),
            row_id: None,
        });

        state.accesses.retain(|a| now_ms - a.timestamp <= window_ms);
        state.accesses.push(Access {
            project_name: project_name.to_string(),
            agent_id: agent_id.to_string(),
            access_type,
            timestamp: now_ms,
        });

        let mut by_agent: HashMap<&str, (ConflictAccess, bool)> = HashMap::new();
        for a in &state.accesses {
            let entry = by_agent.entry(a.agent_id.as_str()).or_insert_with(|| {
                (
                    ConflictAccess {
                        project_name: a.project_name.clone(),
                        agent_id: a.agent_id.clone(),
                        access_type: a.access_type,
                        last_access: a.timestamp,
                    },
                    false,
                )
            });
            if a.timestamp >= entry.0.last_access {
                entry.0.last_access = a.timestamp;
                entry.0.access_type = a.access_type;
            }
            if matches!(a.access_type, AccessType::Write) {
                entry.1 = true;
            }
        }

        let distinct_agents: Vec<&str> = by_agent.keys().copied().collect();
        let writers: Vec<&str> = by_agent.iter().filter(|(_, (_, w))| *w).map(|(k, _)| *k).collect();

        let severity = if distinct_agents.len() >= 2 && writers.len() >= 2 {
            Some(ConflictSeverity::High)
        } else if writers.len() == 1 && distinct_agents.len() >= 2 {
            Some(ConflictSeverity::Medium)
        } else if distinct_agents.len() >= 2 && writers.is_empty() {
            Some(ConflictSeverity::Low)
        } else {
            None
        };

        let severity = severity?;
        let current_agents: std::collections::HashSet<String> = distinct_agents.iter().map(|s| s.to_string()).collect();

        let escalated = match state.last_severity {
            None => true,
            Some(prev) => severity > prev,
        };
        let new_agent_joined = !current_agents.is_subset(&state.last_agents);

        if !escalated && !new_agent_joined {
            return None;
        }

        let is_new = state.last_severity.is_none();
        let existing_id = state.row_id;
        state.last_severity = Some(severity);
        state.last_agents = current_agents;

        let mut accesses: Vec<ConflictAccess> = by_agent.into_values().map(|(a, _)| a).collect();
        accesses.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        Some(ConflictUpdate {
            file_path: file_path.to_string(),
            severity,
            accesses,
            is_new,
            existing_id,
            is_package_manifest: is_package_manifest(file_path),
        })
    }

    /// Records the database row id assigned to a freshly inserted conflict,
    /// so later escalations of the same file update that row instead of
    /// inserting a duplicate.
    pub fn set_row_id(&self, file_path: &str, id: i64) {
        if let Some(state) = self.files.lock().unwrap().get_mut(file_path) {
            state.row_id = Some(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_writers_escalate_to_high() {
        let d = ConflictDetector::new(30);
        let u1 = d.record_access("src/a.ts", "p", "a:1", AccessType::Write, 1_000);
        assert!(u1.is_none());
        let u2 = d.record_access("src/a.ts", "p", "b:1", AccessType::Write, 6_000).unwrap();
        assert_eq!(u2.severity, ConflictSeverity::High);
        assert_eq!(u2.accesses.len(), 2);
    }

    #[test]
    fn one_writer_one_reader_is_medium() {
        let d = ConflictDetector::new(30);
        d.record_access("src/a.ts", "p", "a:1", AccessType::Write, 1_000);
        let u = d.record_access("src/a.ts", "p", "b:1", AccessType::Read, 2_000).unwrap();
        assert_eq!(u.severity, ConflictSeverity::Medium);
    }

    #[test]
    fn two_readers_no_writers_is_low() {
        let d = ConflictDetector::new(30);
        d.record_access("src/a.ts", "p", "a:1", AccessType::Read, 1_000);
        let u = d.record_access("src/a.ts", "p", "b:1", AccessType::Read, 2_000).unwrap();
        assert_eq!(u.severity, ConflictSeverity::Low);
    }

    #[test]
    fn zero_minute_window_never_conflicts() {
        let d = ConflictDetector::new(0);
        d.record_access("src/a.ts", "p", "a:1", AccessType::Write, 1_000);
        let u = d.record_access("src/a.ts", "p", "b:1", AccessType::Write, 1_001);
        assert!(u.is_none());
    }

    #[test]
    fn accesses_outside_window_are_pruned() {
        let d = ConflictDetector::new(30);
        d.record_access("src/a.ts", "p", "a:1", AccessType::Write, 1_000);
        // 31 minutes later, the first access should have expired.
        let u = d.record_access("src/a.ts", "p", "b:1", AccessType::Write, 1_000 + 31 * 60_000);
        assert!(u.is_none());
    }

    #[test]
    fn package_manifest_detection() {
        assert!(is_package_manifest("Cargo.toml"));
        assert!(is_package_manifest("frontend/package.json"));
        assert!(!is_package_manifest("src/a.ts"));
    }
}
