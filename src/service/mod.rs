//! # Service Layer
//!
//! Pure use-case logic. Depends only on the ports (`Store`, `ExecutionEngine`,
//! `MigratorNotifier`, `DryRunner`) so it never touches a concrete storage
//! or transport technology; the HTTP layer is the only caller.
//!
//! Every public method here is one use case: announce, submit candidates,
//! start/cancel/retry a run, update operator inputs, read step progress,
//! dry-run, and delete a migration.

pub mod errors;

pub use errors::{ServiceError, ServiceResult};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use crate::domain::{
    instance_id, Candidate, CandidateStatus, CandidateSubmission, Migration, MigrationAnnouncement,
    MigrationManifest, MigrationWithCandidates, StepOutcome, StepOutcomeStatus,
};
use crate::engine::{EngineError, ExecutionEngine, RunSignal, RuntimeStatus};
use crate::notifier::{DryRunResult, DryRunner, MigratorNotifier};
use crate::store::Store;

/// Step progress as surfaced to the console, whether read live from the
/// engine's `progress` query or synthesized from the event ledger.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgressView {
    pub current_step: Option<String>,
    pub steps: Vec<StepOutcome>,
}

pub struct Service {
    store: Arc<dyn Store>,
    engine: Arc<dyn ExecutionEngine>,
    notifier: Arc<dyn MigratorNotifier>,
    dry_runner: Arc<dyn DryRunner>,
}

impl Service {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn ExecutionEngine>,
        notifier: Arc<dyn MigratorNotifier>,
        dry_runner: Arc<dyn DryRunner>,
    ) -> Self {
        Self {
            store,
            engine,
            notifier,
            dry_runner,
        }
    }

    #[instrument(target = "loom::service", skip(self, announcement))]
    pub async fn announce(&self, announcement: MigrationAnnouncement) -> ServiceResult<Migration> {
        let now = chrono::Utc::now();
        let migration = Migration::from_announcement(announcement, now);
        self.store.save_migration(migration.clone()).await?;
        Ok(migration)
    }

    #[instrument(target = "loom::service", skip(self, candidates))]
    pub async fn submit_candidates(
        &self,
        migration_id: &str,
        candidates: Vec<CandidateSubmission>,
    ) -> ServiceResult<()> {
        let candidates: Vec<Candidate> = candidates.into_iter().map(Candidate::from).collect();
        self.store.save_candidates(migration_id, candidates).await?;
        Ok(())
    }

    #[instrument(target = "loom::service", skip(self))]
    pub async fn list_migrations(&self) -> ServiceResult<Vec<MigrationWithCandidates>> {
        let migrations = self.store.list_migrations().await?;
        let mut out = Vec::with_capacity(migrations.len());
        for migration in migrations {
            let candidates = self.store.get_candidates(&migration.id).await?;
            out.push(MigrationWithCandidates { migration, candidates });
        }
        Ok(out)
    }

    #[instrument(target = "loom::service", skip(self))]
    pub async fn get_migration(&self, migration_id: &str) -> ServiceResult<MigrationWithCandidates> {
        let migration = self.store.get_migration(migration_id).await?;
        let candidates = self.store.get_candidates(migration_id).await?;
        Ok(MigrationWithCandidates { migration, candidates })
    }

    #[instrument(target = "loom::service", skip(self))]
    pub async fn delete_migration(&self, migration_id: &str) -> ServiceResult<()> {
        self.store.delete_migration(migration_id).await?;
        Ok(())
    }

    #[instrument(target = "loom::service", skip(self))]
    pub async fn list_candidates(&self, migration_id: &str) -> ServiceResult<Vec<Candidate>> {
        Ok(self.store.get_candidates(migration_id).await?)
    }

    #[instrument(target = "loom::service", skip(self))]
    pub async fn get_candidate(&self, migration_id: &str, candidate_id: &str) -> ServiceResult<Candidate> {
        Ok(self.store.get_candidate(migration_id, candidate_id).await?)
    }

    /// Starts a run. Inputs are validated against the migration's
    /// `requiredInputs`, merged into a local candidate copy (inputs win),
    /// then the candidate is flipped to `running` before the engine is
    /// asked to start the workflow. If the engine reports the instance
    /// already active, the status write already landed and is left as-is
    /// — it reflects whichever caller actually won the race.
    #[instrument(target = "loom::service", skip(self, inputs))]
    pub async fn start(
        &self,
        migration_id: &str,
        candidate_id: &str,
        inputs: HashMap<String, String>,
    ) -> ServiceResult<()> {
        let migration = self.store.get_migration(migration_id).await?;
        let mut candidate = self.store.get_candidate(migration_id, candidate_id).await?;

        if candidate.status != CandidateStatus::NotStarted {
            return Err(ServiceError::CandidateAlreadyRun {
                migration_id: migration_id.to_string(),
                candidate_id: candidate_id.to_string(),
            });
        }

        for key in inputs.keys() {
            if !migration.is_known_input(key) {
                return Err(ServiceError::InvalidInputKey { name: key.clone() });
            }
        }
        candidate.merge_metadata_incoming_wins(&inputs);
        candidate.migration_id = Some(migration_id.to_string());

        self.store
            .set_candidate_status(migration_id, candidate_id, CandidateStatus::Running)
            .await?;

        let instance = instance_id(migration_id, candidate_id);
        let manifest = MigrationManifest {
            migration_id: migration_id.to_string(),
            steps: migration.steps.clone(),
            candidate,
            migrator_url: migration.migrator_url.clone(),
        };

        match self.engine.start_run(&instance, manifest).await {
            Ok(()) => Ok(()),
            Err(EngineError::AlreadyExists { .. }) => Err(ServiceError::CandidateAlreadyRun {
                migration_id: migration_id.to_string(),
                candidate_id: candidate_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Requests cancellation of a running candidate. `RunNotFound` is
    /// tolerated — the engine run may already have finished between the
    /// candidate-status check and the cancel call — everything else
    /// propagates.
    #[instrument(target = "loom::service", skip(self))]
    pub async fn cancel(&self, migration_id: &str, candidate_id: &str) -> ServiceResult<()> {
        let candidate = self.store.get_candidate(migration_id, candidate_id).await?;
        if candidate.status != CandidateStatus::Running {
            return Err(ServiceError::CandidateNotRunning {
                migration_id: migration_id.to_string(),
                candidate_id: candidate_id.to_string(),
            });
        }

        let instance = instance_id(migration_id, candidate_id);
        match self.engine.cancel_run(&instance).await {
            Ok(()) => Ok(()),
            Err(EngineError::RunNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(target = "loom::service", skip(self))]
    pub async fn retry_step(&self, migration_id: &str, candidate_id: &str, step_name: &str) -> ServiceResult<()> {
        let candidate = self.store.get_candidate(migration_id, candidate_id).await?;
        if candidate.status != CandidateStatus::Running {
            return Err(ServiceError::CandidateNotRunning {
                migration_id: migration_id.to_string(),
                candidate_id: candidate_id.to_string(),
            });
        }

        let instance = instance_id(migration_id, candidate_id);
        self.engine
            .raise_event(
                &instance,
                RunSignal::Retry {
                    step_name: step_name.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Persists operator-supplied inputs unconditionally; if the candidate
    /// is currently running, also signals the workflow so the next
    /// dispatch observes the new values.
    #[instrument(target = "loom::service", skip(self, kv))]
    pub async fn update_inputs(
        &self,
        migration_id: &str,
        candidate_id: &str,
        kv: HashMap<String, String>,
    ) -> ServiceResult<()> {
        let migration = self.store.get_migration(migration_id).await?;
        for key in kv.keys() {
            if !migration.is_known_input(key) {
                return Err(ServiceError::InvalidInputKey { name: key.clone() });
            }
        }

        let candidate = self.store.get_candidate(migration_id, candidate_id).await?;
        self.store
            .update_candidate_metadata(migration_id, candidate_id, kv.clone())
            .await?;

        if candidate.status == CandidateStatus::Running {
            let instance = instance_id(migration_id, candidate_id);
            self.engine
                .raise_event(&instance, RunSignal::UpdateInputs { metadata: kv })
                .await?;
        }
        Ok(())
    }

    /// Delivers a migrator's step-status callback. `run_id` is the opaque
    /// instance id from the URL path (`{migrationId}__{candidateId}`); the
    /// engine owns matching it to an in-flight supervisor.
    #[instrument(target = "loom::service", skip(self, status, metadata))]
    pub async fn record_step_event(
        &self,
        run_id: &str,
        step_name: String,
        status: crate::domain::StepStatus,
        metadata: HashMap<String, String>,
    ) -> ServiceResult<()> {
        self.engine
            .raise_event(run_id, RunSignal::StepEvent { step_name, status, metadata })
            .await?;
        Ok(())
    }

    /// Prefers the engine's live `progress` query; falls back to the
    /// event ledger once the run is terminal or the instance id is
    /// unknown to the engine (already cleaned up on completion/cancel).
    #[instrument(target = "loom::service", skip(self))]
    pub async fn get_step_progress(&self, migration_id: &str, candidate_id: &str) -> ServiceResult<StepProgressView> {
        let instance = instance_id(migration_id, candidate_id);
        match self.engine.get_status(&instance).await {
            Ok(snapshot) if snapshot.runtime_status == RuntimeStatus::Running => {
                let progress = snapshot.output.ok_or_else(|| ServiceError::Internal {
                    message: "running instance reported no progress output".into(),
                })?;
                Ok(StepProgressView {
                    current_step: progress.current_step,
                    steps: progress.step_outcomes,
                })
            }
            _ => self.synthesize_progress_from_ledger(migration_id, candidate_id).await,
        }
    }

    async fn synthesize_progress_from_ledger(
        &self,
        migration_id: &str,
        candidate_id: &str,
    ) -> ServiceResult<StepProgressView> {
        use crate::domain::EventType;

        let events = self.store.events_for(migration_id, candidate_id).await?;
        let mut steps: Vec<StepOutcome> = Vec::new();
        for event in events {
            let Some(step_name) = event.step_name.clone() else { continue };
            match event.event_type {
                EventType::StepDispatched => {
                    if !steps.iter().any(|s| s.step_name == step_name) {
                        steps.push(StepOutcome {
                            step_name,
                            status: StepOutcomeStatus::InProgress,
                            metadata: HashMap::new(),
                            started_at: Some(event.created_at),
                        });
                    }
                }
                EventType::StepCompleted => {
                    let status = match event.status {
                        Some(crate::domain::StepStatus::Succeeded) | Some(crate::domain::StepStatus::Merged) => {
                            StepOutcomeStatus::Succeeded
                        }
                        _ => StepOutcomeStatus::Failed,
                    };
                    if let Some(outcome) = steps.iter_mut().find(|s| s.step_name == step_name) {
                        outcome.status = status;
                        outcome.metadata.extend(event.metadata);
                    } else {
                        steps.push(StepOutcome {
                            step_name,
                            status,
                            metadata: event.metadata,
                            started_at: None,
                        });
                    }
                }
                _ => {}
            }
        }
        let current_step = steps
            .iter()
            .find(|s| s.status == StepOutcomeStatus::InProgress || s.status == StepOutcomeStatus::Failed)
            .map(|s| s.step_name.clone());
        Ok(StepProgressView { current_step, steps })
    }

    /// Raw ledger rows backing every `/metrics/*` projection; the
    /// aggregation itself lives in the stateless `metrics` module so it
    /// can be unit tested without a `Store`.
    #[instrument(target = "loom::service", skip(self))]
    pub async fn all_events_for_metrics(&self) -> ServiceResult<Vec<crate::domain::StepEvent>> {
        Ok(self.store.all_events().await?)
    }

    #[instrument(target = "loom::service", skip(self, candidate))]
    pub async fn dry_run(&self, migration_id: &str, candidate: &Candidate) -> ServiceResult<DryRunResult> {
        let migration = self.store.get_migration(migration_id).await?;
        Ok(self.dry_runner.dry_run(&migration.migrator_url, candidate).await?)
    }

    /// Exposed only so a future admin surface (or a server-startup warmup)
    /// can trigger outbound dispatch retries directly without going
    /// through HTTP; unused by the inbound API today.
    #[allow(dead_code)]
    pub(crate) fn notifier(&self) -> &Arc<dyn MigratorNotifier> {
        &self.notifier
    }
}
