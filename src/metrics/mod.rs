//! # Metrics Queries
//!
//! Read-only projections over the step-event ledger. Kept as plain
//! functions over `Vec<StepEvent>` rather than a trait: the projections are
//! pure aggregation, and every caller already has a `Store` to pull the
//! ledger from.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::{EventType, StepEvent, StepStatus};

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_steps: u64,
    pub prs_raised: u64,
    pub avg_duration_ms: f64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerStepMetrics {
    pub step_name: String,
    pub count: u64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    pub date: String,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub steps_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFailure {
    pub migration_id: String,
    pub candidate_id: String,
    pub step_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// `Overview`: counts plus derived rates across the whole ledger.
pub fn overview(events: &[StepEvent]) -> Overview {
    let total_runs = events.iter().filter(|e| e.event_type == EventType::RunStarted).count() as u64;
    let completed_runs = events.iter().filter(|e| e.event_type == EventType::RunCompleted).count() as u64;

    let step_completions: Vec<&StepEvent> = events
        .iter()
        .filter(|e| e.event_type == EventType::StepCompleted)
        .collect();
    let failed_steps = step_completions
        .iter()
        .filter(|e| e.status == Some(StepStatus::Failed))
        .count() as u64;
    let prs_raised = events.iter().filter(|e| e.metadata.contains_key("prUrl")).count() as u64;

    let durations: Vec<u64> = step_completions.iter().filter_map(|e| e.duration_ms).collect();
    let avg_duration_ms = average(&durations);
    let failure_rate = if step_completions.is_empty() {
        0.0
    } else {
        failed_steps as f64 / step_completions.len() as f64
    };

    Overview {
        total_runs,
        completed_runs,
        failed_steps,
        prs_raised,
        avg_duration_ms,
        failure_rate,
    }
}

/// `PerStep`: per-`stepName` aggregates over `step_completed` rows.
pub fn per_step(events: &[StepEvent]) -> Vec<PerStepMetrics> {
    let mut by_step: HashMap<String, Vec<&StepEvent>> = HashMap::new();
    for event in events {
        if event.event_type != EventType::StepCompleted {
            continue;
        }
        let Some(name) = event.step_name.clone() else { continue };
        by_step.entry(name).or_default().push(event);
    }

    let mut out: Vec<PerStepMetrics> = by_step
        .into_iter()
        .map(|(step_name, rows)| {
            let durations: Vec<u64> = rows.iter().filter_map(|e| e.duration_ms).collect();
            let failed = rows.iter().filter(|e| e.status == Some(StepStatus::Failed)).count();
            PerStepMetrics {
                step_name,
                count: rows.len() as u64,
                avg_duration_ms: average(&durations),
                p95_duration_ms: percentile_95(&durations),
                failure_rate: if rows.is_empty() { 0.0 } else { failed as f64 / rows.len() as f64 },
            }
        })
        .collect();
    out.sort_by(|a, b| a.step_name.cmp(&b.step_name));
    out
}

/// `Timeline(days)`: daily bucketed counts for the trailing `days`,
/// oldest first, always emitting one row per day even if empty.
pub fn timeline(events: &[StepEvent], days: u32, now: DateTime<Utc>) -> Vec<TimelineBucket> {
    let days = days.max(1);
    let mut buckets: Vec<TimelineBucket> = (0..days)
        .rev()
        .map(|offset| {
            let date = (now - Duration::days(offset as i64)).date_naive();
            TimelineBucket {
                date: date.to_string(),
                ..Default::default()
            }
        })
        .collect();

    let earliest = now - Duration::days((days - 1) as i64);
    for event in events {
        if event.created_at < earliest.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc() {
            continue;
        }
        let date = event.created_at.date_naive().to_string();
        let Some(bucket) = buckets.iter_mut().find(|b| b.date == date) else { continue };
        match event.event_type {
            EventType::RunStarted => bucket.runs_started += 1,
            EventType::RunCompleted => bucket.runs_completed += 1,
            EventType::StepCompleted if event.status == Some(StepStatus::Failed) => bucket.steps_failed += 1,
            _ => {}
        }
    }
    buckets
}

/// `RecentFailures(limit)`: most recent failed `step_completed` rows.
pub fn recent_failures(events: &[StepEvent], limit: usize) -> Vec<RecentFailure> {
    let mut failures: Vec<&StepEvent> = events
        .iter()
        .filter(|e| e.event_type == EventType::StepCompleted && e.status == Some(StepStatus::Failed))
        .collect();
    failures.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    failures
        .into_iter()
        .take(limit)
        .map(|e| RecentFailure {
            migration_id: e.migration_id.clone(),
            candidate_id: e.candidate_id.clone(),
            step_name: e.step_name.clone(),
            duration_ms: e.duration_ms,
            created_at: e.created_at,
        })
        .collect()
}

fn average(values: &[u64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<u64>() as f64 / values.len() as f64
    }
}

fn percentile_95(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StepEventBuilder;
    use std::collections::HashMap as Map;

    #[test]
    fn overview_counts_runs_and_failures() {
        let now = Utc::now();
        let events = vec![
            StepEventBuilder::new("m1", "c1", EventType::RunStarted).build(now),
            StepEventBuilder::new("m1", "c1", EventType::StepCompleted)
                .step_name("update")
                .status(StepStatus::Succeeded)
                .duration_ms(1000)
                .build(now),
            StepEventBuilder::new("m1", "c2", EventType::RunStarted).build(now),
            StepEventBuilder::new("m1", "c2", EventType::StepCompleted)
                .step_name("update")
                .status(StepStatus::Failed)
                .duration_ms(500)
                .build(now),
        ];

        let result = overview(&events);
        assert_eq!(result.total_runs, 2);
        assert_eq!(result.failed_steps, 1);
        assert_eq!(result.failure_rate, 0.5);
        assert_eq!(result.avg_duration_ms, 750.0);
    }

    #[test]
    fn recent_failures_sorted_newest_first() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        let mut meta = Map::new();
        meta.insert("prUrl".into(), "http://pr/1".into());
        let events = vec![
            StepEventBuilder::new("m1", "c1", EventType::StepCompleted)
                .step_name("update")
                .status(StepStatus::Failed)
                .build(t0),
            StepEventBuilder::new("m1", "c2", EventType::StepCompleted)
                .step_name("verify")
                .status(StepStatus::Failed)
                .metadata(meta)
                .build(t1),
        ];

        let failures = recent_failures(&events, 10);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].candidate_id, "c2");
    }

    #[test]
    fn timeline_always_emits_one_bucket_per_day() {
        let now = Utc::now();
        let buckets = timeline(&[], 3, now);
        assert_eq!(buckets.len(), 3);
    }
}
