//! Candidate model: one subject a migration applies to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::migration::StepDefinition;

/// Candidate lifecycle status. Transitions only ever go
/// `NotStarted -> Running -> Completed`, with `Running -> NotStarted`
/// permitted by cancel or by the orchestrator's terminal cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    NotStarted,
    Running,
    Completed,
}

impl CandidateStatus {
    /// Whether `self -> next` is a legal transition
    /// (`not_started -> running -> (completed|not_started)`).
    pub fn can_transition_to(self, next: CandidateStatus) -> bool {
        use CandidateStatus::*;
        matches!(
            (self, next),
            (NotStarted, Running) | (Running, Completed) | (Running, NotStarted)
        )
    }
}

/// One named group of file references a candidate carries (e.g. the files
/// in a repository that a step will touch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    pub name: String,
    pub repo_ref: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// A candidate belonging to exactly one migration, keyed by
/// `(migration_id, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub migration_id: Option<String>,
    pub kind: String,
    pub status: CandidateStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub files: Vec<FileGroup>,
    /// When non-empty, replaces the migration-level step list for this
    /// candidate's runs.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl Candidate {
    pub fn new_discovered(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            migration_id: None,
            kind: kind.into(),
            status: CandidateStatus::NotStarted,
            metadata: HashMap::new(),
            files: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// The step list a run of this candidate should execute: its own
    /// override when non-empty, otherwise the migration's step list.
    pub fn effective_steps<'a>(&'a self, migration_steps: &'a [StepDefinition]) -> &'a [StepDefinition] {
        if self.steps.is_empty() {
            migration_steps
        } else {
            &self.steps
        }
    }

    /// Merge `incoming` metadata into `self.metadata` with `incoming` keys
    /// winning — the precedence used for operator-initiated edits
    /// (`UpdateInputs`).
    pub fn merge_metadata_incoming_wins(&mut self, incoming: &HashMap<String, String>) {
        for (k, v) in incoming {
            self.metadata.insert(k.clone(), v.clone());
        }
    }

    /// Merge `incoming` metadata into `self.metadata` with existing keys
    /// winning — the precedence used for rediscovery merges
    /// (`SaveCandidates`), so operator corrections survive re-submission.
    pub fn merge_metadata_existing_wins(&mut self, incoming: &HashMap<String, String>) {
        for (k, v) in incoming {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Wire payload for a discovered candidate (`POST .../candidates`) or for
/// the dry-run request body. `status` is accepted but ignored on submission
/// — the store derives it via merge semantics.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSubmission {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub files: Vec<FileGroup>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl From<CandidateSubmission> for Candidate {
    fn from(s: CandidateSubmission) -> Self {
        Self {
            id: s.id,
            migration_id: None,
            kind: s.kind,
            status: CandidateStatus::NotStarted,
            metadata: s.metadata,
            files: s.files,
            steps: s.steps,
        }
    }
}
