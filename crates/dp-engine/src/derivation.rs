//! Derivation Engine (spec.md §4.3): pure functions over event streams
//! producing session/project metrics, costs, summaries, and health scores.

use std::collections::BTreeMap;

use dp_core::types::{DevLog, HookEvent, HookEventType, Project, Session, TestStatus};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SessionMetrics {
    pub tool_use_count: i64,
    pub tool_failure_count: i64,
    pub tool_success_rate: f64,
    pub avg_turn_duration_secs: f64,
    pub median_turn_duration_secs: f64,
    pub events_per_minute: f64,
    pub activity_timeline: Vec<(i64, i64)>,
}

/// Median, per spec.md §4.3: middle value for odd cardinality, mean of the
/// two middle values otherwise; 0 on empty input.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Pairs each `UserPromptSubmit` with the next `Stop`/`Notification` of the
/// same session; unpaired prompts are ignored. Returns turn durations in
/// seconds.
pub fn turn_durations_secs(events: &[HookEvent]) -> Vec<f64> {
    let mut durations = Vec::new();
    let mut pending_prompt: Option<i64> = None;
    for e in events {
        match e.hook_event_type {
            HookEventType::UserPromptSubmit => pending_prompt = Some(e.timestamp),
            HookEventType::Stop | HookEventType::Notification => {
                if let Some(start) = pending_prompt.take() {
                    durations.push(((e.timestamp - start).max(0) as f64) / 1_000.0);
                }
            }
            _ => {}
        }
    }
    durations
}

pub fn session_metrics(session: &Session, events: &[HookEvent]) -> SessionMetrics {
    let denom = session.tool_use_count + session.tool_failure_count;
    let tool_success_rate = if denom == 0 {
        0.0
    } else {
        100.0 * session.tool_use_count as f64 / denom as f64
    };

    let mut durations = turn_durations_secs(events);
    let avg = mean(&durations);
    let med = median(&mut durations);

    let span_minutes = ((session.last_event_at - session.started_at).max(0) as f64) / 60_000.0;
    let events_per_minute = if span_minutes > 0.0 {
        session.event_count as f64 / span_minutes
    } else {
        session.event_count as f64
    };

    let mut timeline: BTreeMap<i64, i64> = BTreeMap::new();
    for e in events {
        let minute = (e.timestamp - session.started_at).max(0) / 60_000;
        *timeline.entry(minute).or_insert(0) += 1;
    }

    SessionMetrics {
        tool_use_count: session.tool_use_count,
        tool_failure_count: session.tool_failure_count,
        tool_success_rate,
        avg_turn_duration_secs: avg,
        median_turn_duration_secs: med,
        events_per_minute,
        activity_timeline: timeline.into_iter().collect(),
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProjectMetrics {
    pub mean_tool_success_rate: f64,
    pub total_tool_use_count: i64,
    pub total_tool_failure_count: i64,
    pub total_duration_minutes: f64,
}

pub fn project_metrics(sessions: &[&Session], per_session: &[SessionMetrics]) -> ProjectMetrics {
    let rates: Vec<f64> = per_session.iter().map(|m| m.tool_success_rate).collect();
    let total_duration_minutes: f64 = sessions
        .iter()
        .map(|s| ((s.last_event_at - s.started_at).max(0) as f64) / 60_000.0)
        .sum();

    ProjectMetrics {
        mean_tool_success_rate: mean(&rates),
        total_tool_use_count: per_session.iter().map(|m| m.tool_use_count).sum(),
        total_tool_failure_count: per_session.iter().map(|m| m.tool_failure_count).sum(),
        total_duration_minutes,
    }
}

/// `model_name -> (input $/Mtok, output $/Mtok)`. Estimates only, per
/// spec.md's non-goal on exact LLM cost accounting.
pub fn cost_table() -> BTreeMap<&'static str, (f64, f64)> {
    let mut t = BTreeMap::new();
    t.insert("claude-opus-4", (15.0, 75.0));
    t.insert("claude-sonnet-4", (3.0, 15.0));
    t.insert("claude-haiku-4", (0.8, 4.0));
    t.insert("gpt-4o", (2.5, 10.0));
    t.insert("gpt-4o-mini", (0.15, 0.6));
    t.insert("gemini-1.5-pro", (1.25, 5.0));
    t.insert("default", (3.0, 15.0));
    t
}

/// Estimates token usage from payload size: roughly 4 bytes per token,
/// split 70/30 between input and output, since the source carries no
/// token counts and spec.md treats costs as estimates.
pub fn estimate_cost_usd(model_name: Option<&str>, payload_bytes: usize) -> f64 {
    let table = cost_table();
    let (input_rate, output_rate) = table
        .get(model_name.unwrap_or("default"))
        .or_else(|| table.get("default"))
        .copied()
        .unwrap_or((3.0, 15.0));

    let tokens = (payload_bytes as f64 / 4.0).max(1.0);
    let input_tokens = tokens * 0.7;
    let output_tokens = tokens * 0.3;
    (input_tokens / 1_000_000.0) * input_rate + (output_tokens / 1_000_000.0) * output_rate
}

pub fn event_cost_usd(event: &HookEvent) -> f64 {
    let bytes = event.payload.to_string().len();
    estimate_cost_usd(event.model_name.as_deref(), bytes)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PeriodSummary {
    pub project_name: String,
    pub session_count: i64,
    pub total_duration_minutes: f64,
    pub tool_breakdown: BTreeMap<String, i64>,
    pub files_changed: Vec<String>,
    pub commits: Vec<String>,
    pub commit_count: i64,
}

pub fn summarize(project_name: &str, devlogs: &[&DevLog]) -> PeriodSummary {
    let mut tool_breakdown: BTreeMap<String, i64> = BTreeMap::new();
    let mut files: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut commits: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut total_duration = 0.0;

    for log in devlogs {
        total_duration += log.duration_minutes;
        for (tool, count) in &log.tool_breakdown {
            *tool_breakdown.entry(tool.clone()).or_insert(0) += count;
        }
        files.extend(log.files_changed.iter().cloned());
        commits.extend(log.commits.iter().cloned());
    }

    PeriodSummary {
        project_name: project_name.to_string(),
        session_count: devlogs.len() as i64,
        total_duration_minutes: total_duration,
        tool_breakdown,
        files_changed: files.into_iter().collect(),
        commit_count: commits.len() as i64,
        commits: commits.into_iter().collect(),
    }
}

/// Health score (0-100) per spec.md §4.3: 40% test status, 30% activity
/// (linear in events over the last 24h up to a cap of 200), 30% error rate.
pub fn health_score(test_status: TestStatus, events_last_24h: i64, failures_last_24h: i64, total_last_24h: i64) -> f64 {
    let test_component = match test_status {
        TestStatus::Passing => 100.0,
        TestStatus::Unknown => 60.0,
        TestStatus::Failing => 0.0,
    };
    let activity_cap = 200.0;
    let activity_component = (events_last_24h as f64 / activity_cap).min(1.0) * 100.0;
    let error_component = if total_last_24h == 0 {
        100.0
    } else {
        100.0 * (1.0 - failures_last_24h as f64 / total_last_24h as f64)
    };

    0.4 * test_component + 0.3 * activity_component + 0.3 * error_component
}

pub fn health_trend(today: f64, yesterday: f64) -> i32 {
    if today > yesterday {
        1
    } else if today < yesterday {
        -1
    } else {
        0
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HeatmapCell {
    pub day: String,
    pub hour: u32,
    pub count: i64,
}

pub fn heatmap_response(cells: Vec<(String, u32, i64)>) -> (Vec<HeatmapCell>, i64) {
    let max_count = cells.iter().map(|(_, _, c)| *c).max().unwrap_or(0);
    (
        cells.into_iter().map(|(day, hour, count)| HeatmapCell { day, hour, count }).collect(),
        max_count,
    )
}

/// Excludes sessions whose status the project no longer counts as active;
/// helper shared by project rollups.
pub fn active_session_count(sessions: &[&Session]) -> i64 {
    sessions
        .iter()
        .filter(|s| s.status != dp_core::types::SessionStatus::Stopped)
        .count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&mut [1.0, 2.0, 3.0, 4.0, 5.0]), 3.0);
        assert_eq!(median(&mut [1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn tool_success_rate_matches_spec_scenario() {
        let mut session = blank_session();
        session.tool_use_count = 8;
        session.tool_failure_count = 2;
        let metrics = session_metrics(&session, &[]);
        assert_eq!(metrics.tool_success_rate, 80.0);
    }

    #[test]
    fn health_score_full_marks() {
        let score = health_score(TestStatus::Passing, 200, 0, 100);
        assert!((score - 100.0).abs() < 1e-9);
    }

    fn blank_session() -> Session {
        Session {
            session_id: "s1".into(),
            source_app: "app1".into(),
            project_name: "p".into(),
            status: dp_core::types::SessionStatus::Active,
            current_branch: None,
            started_at: 0,
            last_event_at: 60_000,
            event_count: 10,
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
}
