//! The append-only step-event ledger, the single source that feeds metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle event types recorded against a `(migration_id, candidate_id)`
/// pair. Rows are immutable once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,
    StepDispatched,
    StepCompleted,
    StepRetried,
}

/// Terminal/intermediate status carried by `step_completed` and
/// `step_dispatched`-adjacent `step_event` signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Merged,
    Pending,
}

impl StepStatus {
    pub fn is_terminal_success(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Merged)
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub id: Uuid,
    pub migration_id: String,
    pub candidate_id: String,
    pub step_name: Option<String>,
    pub event_type: EventType,
    pub status: Option<StepStatus>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Builder mirroring the construction pattern used elsewhere in this
/// codebase for append-only log entries: explicit fields, no hidden
/// defaults beyond a fresh id and timestamp.
pub struct StepEventBuilder {
    migration_id: String,
    candidate_id: String,
    event_type: EventType,
    step_name: Option<String>,
    status: Option<StepStatus>,
    duration_ms: Option<u64>,
    metadata: HashMap<String, String>,
}

impl StepEventBuilder {
    pub fn new(migration_id: impl Into<String>, candidate_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            migration_id: migration_id.into(),
            candidate_id: candidate_id.into(),
            event_type,
            step_name: None,
            status: None,
            duration_ms: None,
            metadata: HashMap::new(),
        }
    }

    pub fn step_name(mut self, name: impl Into<String>) -> Self {
        self.step_name = Some(name.into());
        self
    }

    pub fn status(mut self, status: StepStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self, now: DateTime<Utc>) -> StepEvent {
        StepEvent {
            id: Uuid::new_v4(),
            migration_id: self.migration_id,
            candidate_id: self.candidate_id,
            step_name: self.step_name,
            event_type: self.event_type,
            status: self.status,
            duration_ms: self.duration_ms,
            metadata: self.metadata,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_success_recognizes_succeeded_and_merged() {
        assert!(StepStatus::Succeeded.is_terminal_success());
        assert!(StepStatus::Merged.is_terminal_success());
        assert!(!StepStatus::Failed.is_terminal_success());
        assert!(!StepStatus::Pending.is_terminal_success());
    }

    #[test]
    fn builder_produces_immutable_row() {
        let event = StepEventBuilder::new("m1", "c1", EventType::StepCompleted)
            .step_name("update")
            .status(StepStatus::Succeeded)
            .duration_ms(1200)
            .build(Utc::now());

        assert_eq!(event.migration_id, "m1");
        assert_eq!(event.step_name.as_deref(), Some("update"));
        assert_eq!(event.status, Some(StepStatus::Succeeded));
    }
}
