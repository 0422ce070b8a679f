//! # Orchestrator Workflow
//!
//! The pure per-step decision logic that drives one candidate through its
//! step list. Kept free of Tokio and the Store so every transition rule can
//! be unit tested as ordinary synchronous code; [`crate::engine::local`]
//! wraps this in the supervisor task that actually suspends, persists, and
//! redispatches.
//!
//! Mirrors the step-result/result-map pattern: `step_outcomes` is a flat
//! `Vec` searched by name rather than a map, since step counts are small and
//! insertion order matters for the progress view.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::{RunHistory, RunSignalEvent, RunSignalRetry, StepOutcome, StepOutcomeStatus, StepStatus};

/// What the supervisor should do next after applying one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The step is still pending; keep selecting on the same step.
    Continue,
    /// The step reached terminal success; advance `step_index`.
    Advance,
    /// The step failed; wait for a `retry` or cancellation.
    AwaitRetry,
    /// A retry was accepted; the caller should redispatch the same step.
    Retry,
    /// The signal did not apply (late event for a finished step, retry for
    /// a step that never failed) and was silently dropped.
    Ignored,
}

/// Ensures a `step_outcomes` row exists for `step_name` in the `InProgress`
/// state, returning a mutable reference to it. Used both when first
/// dispatching a step and when a retry resets its row.
pub fn start_step(history: &mut RunHistory, step_name: &str, now: DateTime<Utc>) -> &mut StepOutcome {
    if let Some(pos) = history.step_outcomes.iter().position(|o| o.step_name == step_name) {
        let outcome = &mut history.step_outcomes[pos];
        outcome.status = StepOutcomeStatus::InProgress;
        outcome.started_at = Some(now);
        outcome.metadata.clear();
    } else {
        history.step_outcomes.push(StepOutcome {
            step_name: step_name.to_string(),
            status: StepOutcomeStatus::InProgress,
            metadata: HashMap::new(),
            started_at: Some(now),
        });
    }
    history
        .step_outcomes
        .iter_mut()
        .find(|o| o.step_name == step_name)
        .expect("just inserted or updated")
}

fn outcome_mut<'a>(history: &'a mut RunHistory, step_name: &str) -> Option<&'a mut StepOutcome> {
    history.step_outcomes.iter_mut().find(|o| o.step_name == step_name)
}

/// Applies one buffered `stepEvent` signal against the current step's
/// result row. A signal for any step other than the current one, or for a
/// step whose row is already terminal, is dropped — a late event for a
/// terminal step is always ignored.
pub fn apply_step_event(history: &mut RunHistory, current_step: &str, signal: RunSignalEvent) -> SignalOutcome {
    if signal.step_name != current_step {
        return SignalOutcome::Ignored;
    }
    let Some(outcome) = outcome_mut(history, current_step) else {
        return SignalOutcome::Ignored;
    };
    if !matches!(outcome.status, StepOutcomeStatus::InProgress | StepOutcomeStatus::Failed) {
        return SignalOutcome::Ignored;
    }

    match signal.status {
        StepStatus::Pending => {
            for (k, v) in signal.metadata {
                outcome.metadata.insert(k, v);
            }
            SignalOutcome::Continue
        }
        StepStatus::Succeeded | StepStatus::Merged => {
            outcome.status = StepOutcomeStatus::Succeeded;
            for (k, v) in signal.metadata {
                outcome.metadata.insert(k, v);
            }
            SignalOutcome::Advance
        }
        StepStatus::Failed => {
            outcome.status = StepOutcomeStatus::Failed;
            for (k, v) in signal.metadata {
                outcome.metadata.insert(k, v);
            }
            SignalOutcome::AwaitRetry
        }
    }
}

/// Applies a buffered `retry` signal. Honored only when the current step's
/// row is `Failed` and the retry names that same step; otherwise ignored
/// (retry for a step that never failed, or for a different step, is a
/// no-op).
pub fn apply_retry(history: &mut RunHistory, current_step: &str, signal: RunSignalRetry) -> SignalOutcome {
    if signal.step_name != current_step {
        return SignalOutcome::Ignored;
    }
    match outcome_mut(history, current_step) {
        Some(outcome) if outcome.status == StepOutcomeStatus::Failed => SignalOutcome::Retry,
        _ => SignalOutcome::Ignored,
    }
}

/// Applies a buffered `updateInputs` signal: merges into the run's mutable
/// candidate metadata snapshot, incoming values winning. Never advances the
/// step; the new values are only observed on the *next* dispatch.
pub fn apply_update_inputs(history: &mut RunHistory, kv: HashMap<String, String>) {
    for (k, v) in kv {
        history.candidate_metadata.insert(k, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candidate, MigrationManifest, StepDefinition};

    fn manifest() -> MigrationManifest {
        MigrationManifest {
            migration_id: "m1".into(),
            steps: vec![
                StepDefinition {
                    name: "update".into(),
                    description: None,
                    migrator_app: "helm".into(),
                    config: HashMap::new(),
                },
                StepDefinition {
                    name: "verify".into(),
                    description: None,
                    migrator_app: "helm".into(),
                    config: HashMap::new(),
                },
            ],
            candidate: Candidate::new_discovered("c1", "app"),
            migrator_url: "http://mig".into(),
        }
    }

    #[test]
    fn pending_then_succeeded_advances_and_keeps_metadata() {
        let mut history = RunHistory::new(manifest());
        start_step(&mut history, "update", Utc::now());

        let mut pending_meta = HashMap::new();
        pending_meta.insert("prUrl".into(), "http://pr/1".into());
        let outcome = apply_step_event(
            &mut history,
            "update",
            RunSignalEvent {
                step_name: "update".into(),
                status: StepStatus::Pending,
                metadata: pending_meta,
            },
        );
        assert_eq!(outcome, SignalOutcome::Continue);

        let outcome = apply_step_event(
            &mut history,
            "update",
            RunSignalEvent {
                step_name: "update".into(),
                status: StepStatus::Succeeded,
                metadata: HashMap::new(),
            },
        );
        assert_eq!(outcome, SignalOutcome::Advance);

        let row = history.step_outcomes.iter().find(|o| o.step_name == "update").unwrap();
        assert_eq!(row.status, StepOutcomeStatus::Succeeded);
        assert_eq!(row.metadata.get("prUrl").unwrap(), "http://pr/1");
    }

    #[test]
    fn late_event_for_terminal_step_is_dropped() {
        let mut history = RunHistory::new(manifest());
        start_step(&mut history, "update", Utc::now());
        apply_step_event(
            &mut history,
            "update",
            RunSignalEvent {
                step_name: "update".into(),
                status: StepStatus::Succeeded,
                metadata: HashMap::new(),
            },
        );

        let outcome = apply_step_event(
            &mut history,
            "update",
            RunSignalEvent {
                step_name: "update".into(),
                status: StepStatus::Failed,
                metadata: HashMap::new(),
            },
        );
        assert_eq!(outcome, SignalOutcome::Ignored);
    }

    #[test]
    fn retry_only_honored_after_failure() {
        let mut history = RunHistory::new(manifest());
        start_step(&mut history, "update", Utc::now());

        let ignored = apply_retry(&mut history, "update", RunSignalRetry { step_name: "update".into() });
        assert_eq!(ignored, SignalOutcome::Ignored);

        apply_step_event(
            &mut history,
            "update",
            RunSignalEvent {
                step_name: "update".into(),
                status: StepStatus::Failed,
                metadata: HashMap::new(),
            },
        );
        let accepted = apply_retry(&mut history, "update", RunSignalRetry { step_name: "update".into() });
        assert_eq!(accepted, SignalOutcome::Retry);
    }

    #[test]
    fn update_inputs_merges_incoming_wins_without_advancing() {
        let mut history = RunHistory::new(manifest());
        history.candidate_metadata.insert("team".into(), "platform".into());
        let mut incoming = HashMap::new();
        incoming.insert("team".into(), "growth".into());
        apply_update_inputs(&mut history, incoming);
        assert_eq!(history.candidate_metadata["team"], "growth");
        assert_eq!(history.step_index, 0);
    }
}
