//! Durable per-run state.
//!
//! This is what the Execution Engine persists through the Store so that a
//! restarted process can rehydrate every in-flight run and resume at the
//! same suspension point, rather than losing progress or buffered signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::event::StepStatus;
use super::manifest::MigrationManifest;

/// Status of one step's result row within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcomeStatus {
    Pending,
    InProgress,
    Failed,
    Succeeded,
}

/// The orchestrator's in-memory result row for one step, keyed by step
/// name; the latest write for a given name wins (a retry clears it back to
/// `InProgress`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_name: String,
    pub status: StepOutcomeStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// A buffered `stepEvent` signal, durably queued until the orchestrator is
/// selecting on the matching step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSignalEvent {
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A buffered `retry` signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSignalRetry {
    pub step_name: String,
}

/// Per-channel durable queues. Signals are applied in arrival order; a
/// channel the workflow is not currently selecting on simply accumulates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSignalInbox {
    pub events: VecDeque<RunSignalEvent>,
    pub retries: VecDeque<RunSignalRetry>,
    pub update_inputs: VecDeque<HashMap<String, String>>,
}

/// The full durable state of one run, as persisted by the Execution
/// Engine through the Store after every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistory {
    pub manifest: MigrationManifest,
    /// Mutable candidate metadata snapshot; starts as the manifest's
    /// candidate metadata and absorbs `updateInputs` signals (incoming
    /// wins) between dispatches.
    pub candidate_metadata: HashMap<String, String>,
    pub step_index: usize,
    pub step_outcomes: Vec<StepOutcome>,
    pub inbox: RunSignalInbox,
    pub cancel_requested: bool,
    /// Set once the `run_started` ledger row has been written, so a
    /// supervisor rehydrated after a restart does not emit a second one for
    /// the same run.
    #[serde(default)]
    pub started_event_recorded: bool,
}

impl RunHistory {
    pub fn new(manifest: MigrationManifest) -> Self {
        let candidate_metadata = manifest.candidate.metadata.clone();
        Self {
            manifest,
            candidate_metadata,
            step_index: 0,
            step_outcomes: Vec::new(),
            inbox: RunSignalInbox::default(),
            cancel_requested: false,
            started_event_recorded: false,
        }
    }

    /// The step list this run executes, resolved once at construction time
    /// from the candidate's override or the manifest's migration steps.
    pub fn effective_step_names(&self) -> Vec<String> {
        let steps = self.manifest.candidate.effective_steps(&self.manifest.steps);
        steps.iter().map(|s| s.name.clone()).collect()
    }

    pub fn current_step_name(&self) -> Option<String> {
        self.effective_step_names().get(self.step_index).cloned()
    }

    pub fn is_finished(&self) -> bool {
        self.step_index >= self.effective_step_names().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::Candidate;
    use crate::domain::migration::StepDefinition;

    fn manifest() -> MigrationManifest {
        MigrationManifest {
            migration_id: "m1".into(),
            steps: vec![StepDefinition {
                name: "update".into(),
                description: None,
                migrator_app: "helm".into(),
                config: Default::default(),
            }],
            candidate: Candidate::new_discovered("c1", "app"),
            migrator_url: "http://mig".into(),
        }
    }

    #[test]
    fn fresh_history_starts_at_first_step() {
        let history = RunHistory::new(manifest());
        assert_eq!(history.current_step_name().as_deref(), Some("update"));
        assert!(!history.is_finished());
    }

    #[test]
    fn finishes_once_index_passes_last_step() {
        let mut history = RunHistory::new(manifest());
        history.step_index = 1;
        assert!(history.is_finished());
        assert_eq!(history.current_step_name(), None);
    }
}
