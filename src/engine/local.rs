//! In-process Tokio-task Execution Engine.
//!
//! One supervisor per active run, selecting over the run's durable signal
//! inbox and a `CancellationToken`. Every transition is persisted through
//! the [`Store`] before the supervisor acts on it, so [`LocalEngine::rehydrate`]
//! can resume every still-active run after a process restart by reloading
//! its `RunHistory` and continuing the loop exactly where it left off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, Notify, RwLock as AsyncRwLock};
use tokio_util::sync::CancellationToken;

use super::{EngineError, EngineResult, ExecutionEngine, RunProgress, RunSignal, RunStatusSnapshot, RuntimeStatus};
use crate::domain::{
    CandidateStatus, EventType, MigrationManifest, RunHistory, RunSignalEvent, RunSignalRetry, StepEventBuilder,
    StepOutcomeStatus, StepStatus,
};
use crate::notifier::{DispatchStepRequest, MigratorNotifier};
use crate::orchestrator::{self, SignalOutcome};
use crate::store::Store;

const EVENT_NAME: &str = "stepEvent";
const RETRY_EVENT_NAME: &str = "retry";

/// Backoff policy for the dispatch activity's outbound HTTP call. Exhausting
/// the attempt budget is treated as a step failure, funneling into the same
/// retry/cancel wait the migrator's own `failed` callback would.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for DispatchRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

struct RunHandle {
    history: Arc<AsyncMutex<RunHistory>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    status: Arc<AsyncRwLock<RunStatusSnapshot>>,
}

enum WaitOutcome {
    Advance,
    Retry,
    Cancelled,
}

pub struct LocalEngine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn MigratorNotifier>,
    retry_policy: DispatchRetryPolicy,
    runs: Arc<StdMutex<HashMap<String, RunHandle>>>,
}

impl LocalEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn MigratorNotifier>, retry_policy: DispatchRetryPolicy) -> Self {
        Self {
            store,
            notifier,
            retry_policy,
            runs: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn spawn_supervisor(&self, instance_id: String, history: RunHistory) {
        let history = Arc::new(AsyncMutex::new(history));
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let initial_step = history_blocking_current_step(&history);
        let status = Arc::new(AsyncRwLock::new(RunStatusSnapshot {
            runtime_status: RuntimeStatus::Running,
            output: Some(RunProgress {
                current_step: initial_step,
                step_outcomes: Vec::new(),
            }),
        }));

        let handle = RunHandle {
            history: history.clone(),
            notify: notify.clone(),
            cancel: cancel.clone(),
            status: status.clone(),
        };
        self.runs.lock().unwrap().insert(instance_id.clone(), handle);

        let supervisor = Supervisor {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            retry_policy: self.retry_policy,
            runs: self.runs.clone(),
        };

        tokio::spawn(async move {
            supervisor.run(instance_id.clone(), history, notify, cancel, status).await;
        });
    }
}

/// Reads the run's current step name without an async context, for seeding
/// the status snapshot before the supervisor task has had a chance to run.
fn history_blocking_current_step(history: &Arc<AsyncMutex<RunHistory>>) -> Option<String> {
    history.try_lock().ok().and_then(|h| h.current_step_name())
}

#[async_trait]
impl ExecutionEngine for LocalEngine {
    async fn start_run(&self, instance_id: &str, manifest: MigrationManifest) -> EngineResult<()> {
        {
            let runs = self.runs.lock().unwrap();
            if runs.contains_key(instance_id) {
                return Err(EngineError::AlreadyExists {
                    instance_id: instance_id.to_string(),
                });
            }
        }
        let history = RunHistory::new(manifest);
        self.store.save_run_history(instance_id, history.clone()).await?;
        self.spawn_supervisor(instance_id.to_string(), history);
        Ok(())
    }

    async fn get_status(&self, instance_id: &str) -> EngineResult<RunStatusSnapshot> {
        let status = {
            let runs = self.runs.lock().unwrap();
            runs.get(instance_id).map(|h| h.status.clone())
        };
        match status {
            Some(status) => Ok(status.read().await.clone()),
            None => Err(EngineError::RunNotFound {
                instance_id: instance_id.to_string(),
            }),
        }
    }

    async fn cancel_run(&self, instance_id: &str) -> EngineResult<()> {
        let cancel = {
            let runs = self.runs.lock().unwrap();
            runs.get(instance_id).map(|h| h.cancel.clone())
        };
        match cancel {
            Some(cancel) => {
                cancel.cancel();
                Ok(())
            }
            None => Err(EngineError::RunNotFound {
                instance_id: instance_id.to_string(),
            }),
        }
    }

    async fn raise_event(&self, instance_id: &str, signal: RunSignal) -> EngineResult<()> {
        let handle = {
            let runs = self.runs.lock().unwrap();
            runs.get(instance_id).map(|h| (h.history.clone(), h.notify.clone()))
        };
        let Some((history, notify)) = handle else {
            return Err(EngineError::RunNotFound {
                instance_id: instance_id.to_string(),
            });
        };

        {
            let mut h = history.lock().await;
            match signal {
                RunSignal::StepEvent { step_name, status, metadata } => {
                    h.inbox.events.push_back(RunSignalEvent { step_name, status, metadata });
                }
                RunSignal::Retry { step_name } => {
                    h.inbox.retries.push_back(RunSignalRetry { step_name });
                }
                RunSignal::UpdateInputs { metadata } => {
                    h.inbox.update_inputs.push_back(metadata);
                }
            }
            self.store.save_run_history(instance_id, h.clone()).await?;
        }
        notify.notify_one();
        Ok(())
    }

    async fn rehydrate(&self) -> EngineResult<()> {
        let ids = self.store.list_run_history_ids().await?;
        for instance_id in ids {
            if self.runs.lock().unwrap().contains_key(&instance_id) {
                continue;
            }
            if let Some(history) = self.store.load_run_history(&instance_id).await? {
                tracing::info!(target: "loom::engine", instance_id = %instance_id, "rehydrating run after restart");
                self.spawn_supervisor(instance_id, history);
            }
        }
        Ok(())
    }
}

/// Holds only what a single run's task needs; constructed fresh per run so
/// the supervisor loop never has to reach back through `Arc<LocalEngine>`.
/// Keeps a handle to the shared `runs` table so it can retire its own entry
/// once the run reaches a terminal state.
struct Supervisor {
    store: Arc<dyn Store>,
    notifier: Arc<dyn MigratorNotifier>,
    retry_policy: DispatchRetryPolicy,
    runs: Arc<StdMutex<HashMap<String, RunHandle>>>,
}

impl Supervisor {
    async fn persist(&self, instance_id: &str, history: &Arc<AsyncMutex<RunHistory>>) {
        let snapshot = history.lock().await.clone();
        if let Err(e) = self.store.save_run_history(instance_id, snapshot).await {
            tracing::error!(target: "loom::engine", instance_id, error = %e, "failed to persist run history");
        }
    }

    async fn record_event(&self, event: crate::domain::StepEvent) {
        if let Err(e) = self.store.record_event(event).await {
            tracing::error!(target: "loom::engine", error = %e, "failed to record step event");
        }
    }

    async fn refresh_status(&self, history: &Arc<AsyncMutex<RunHistory>>, status: &Arc<AsyncRwLock<RunStatusSnapshot>>) {
        let (current_step, step_outcomes) = {
            let h = history.lock().await;
            (h.current_step_name(), h.step_outcomes.clone())
        };
        let mut guard = status.write().await;
        guard.runtime_status = RuntimeStatus::Running;
        guard.output = Some(RunProgress {
            current_step,
            step_outcomes,
        });
    }

    fn build_dispatch_request(&self, history: &RunHistory, step_name: &str) -> DispatchStepRequest {
        let mut candidate = history.manifest.candidate.clone();
        candidate.metadata = history.candidate_metadata.clone();

        let config = history
            .manifest
            .steps
            .iter()
            .chain(history.manifest.candidate.steps.iter())
            .find(|s| s.name == step_name)
            .map(|s| s.config.clone())
            .unwrap_or_default();

        DispatchStepRequest {
            migration_id: history.manifest.migration_id.clone(),
            step_name: step_name.to_string(),
            step_config: config,
            candidate,
            migrator_url: history.manifest.migrator_url.clone(),
            event_name: EVENT_NAME.to_string(),
            retry_event_name: RETRY_EVENT_NAME.to_string(),
        }
    }

    async fn dispatch_step(&self, instance_id: &str, history: &Arc<AsyncMutex<RunHistory>>, step_name: &str, cancel: &CancellationToken) {
        let now = Utc::now();
        let (migration_id, candidate_id, req) = {
            let mut h = history.lock().await;
            orchestrator::start_step(&mut h, step_name, now);
            let req = self.build_dispatch_request(&h, step_name);
            (h.manifest.migration_id.clone(), h.manifest.candidate.id.clone(), req)
        };
        self.persist(instance_id, history).await;
        self.record_event(
            StepEventBuilder::new(&migration_id, &candidate_id, EventType::StepDispatched)
                .step_name(step_name)
                .build(Utc::now()),
        )
        .await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.notifier.dispatch(&req) => {
                    match result {
                        Ok(()) => return,
                        Err(e) => {
                            if attempt >= self.retry_policy.max_attempts {
                                tracing::warn!(
                                    target: "loom::engine",
                                    instance_id,
                                    step = step_name,
                                    error = %e,
                                    "dispatch attempts exhausted, marking step failed"
                                );
                                self.record_dispatch_exhausted(instance_id, history, step_name, &e.to_string()).await;
                                return;
                            }
                            tokio::time::sleep(self.retry_policy.base_delay * 2u32.pow(attempt - 1)).await;
                        }
                    }
                }
            }
        }
    }

    async fn record_dispatch_exhausted(&self, instance_id: &str, history: &Arc<AsyncMutex<RunHistory>>, step_name: &str, message: &str) {
        let (migration_id, candidate_id, started_at) = {
            let mut h = history.lock().await;
            if let Some(outcome) = h.step_outcomes.iter_mut().find(|o| o.step_name == step_name) {
                outcome.status = StepOutcomeStatus::Failed;
                outcome.metadata.insert("error".into(), message.to_string());
            }
            (
                h.manifest.migration_id.clone(),
                h.manifest.candidate.id.clone(),
                h.step_outcomes.iter().find(|o| o.step_name == step_name).and_then(|o| o.started_at),
            )
        };
        self.persist(instance_id, history).await;

        let duration_ms = started_at.map(|s| (Utc::now() - s).num_milliseconds().max(0) as u64);
        self.record_event(
            StepEventBuilder::new(&migration_id, &candidate_id, EventType::StepCompleted)
                .step_name(step_name)
                .status(StepStatus::Failed)
                .duration_ms(duration_ms.unwrap_or(0))
                .build(Utc::now()),
        )
        .await;
    }

    async fn record_step_completed(&self, history: &Arc<AsyncMutex<RunHistory>>, step_name: &str, succeeded: bool) -> crate::domain::StepEvent {
        let h = history.lock().await;
        let outcome = h.step_outcomes.iter().find(|o| o.step_name == step_name);
        let duration_ms = outcome
            .and_then(|o| o.started_at)
            .map(|s| (Utc::now() - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        let metadata = outcome.map(|o| o.metadata.clone()).unwrap_or_default();

        StepEventBuilder::new(&h.manifest.migration_id, &h.manifest.candidate.id, EventType::StepCompleted)
            .step_name(step_name)
            .status(if succeeded { StepStatus::Succeeded } else { StepStatus::Failed })
            .duration_ms(duration_ms)
            .metadata(metadata)
            .build(Utc::now())
    }

    async fn wait_for_decision(
        &self,
        instance_id: &str,
        history: &Arc<AsyncMutex<RunHistory>>,
        step_name: &str,
        notify: &Arc<Notify>,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        loop {
            let drained_inputs = {
                let mut h = history.lock().await;
                let mut any = false;
                while let Some(kv) = h.inbox.update_inputs.pop_front() {
                    orchestrator::apply_update_inputs(&mut h, kv);
                    any = true;
                }
                any
            };
            if drained_inputs {
                self.persist(instance_id, history).await;
            }

            let next_event = {
                let mut h = history.lock().await;
                h.inbox.events.pop_front()
            };
            if let Some(event) = next_event {
                let decision = {
                    let mut h = history.lock().await;
                    orchestrator::apply_step_event(&mut h, step_name, event)
                };
                self.persist(instance_id, history).await;
                match decision {
                    SignalOutcome::Advance => {
                        let event = self.record_step_completed(history, step_name, true).await;
                        self.record_event(event).await;
                        let mut h = history.lock().await;
                        h.step_index += 1;
                        drop(h);
                        self.persist(instance_id, history).await;
                        return WaitOutcome::Advance;
                    }
                    SignalOutcome::AwaitRetry => {
                        let event = self.record_step_completed(history, step_name, false).await;
                        self.record_event(event).await;
                        continue;
                    }
                    SignalOutcome::Continue | SignalOutcome::Ignored | SignalOutcome::Retry => continue,
                }
            }

            let next_retry = {
                let mut h = history.lock().await;
                h.inbox.retries.pop_front()
            };
            if let Some(retry) = next_retry {
                let decision = {
                    let mut h = history.lock().await;
                    orchestrator::apply_retry(&mut h, step_name, retry)
                };
                if decision == SignalOutcome::Retry {
                    let (migration_id, candidate_id) = {
                        let h = history.lock().await;
                        (h.manifest.migration_id.clone(), h.manifest.candidate.id.clone())
                    };
                    self.record_event(
                        StepEventBuilder::new(&migration_id, &candidate_id, EventType::StepRetried)
                            .step_name(step_name)
                            .build(Utc::now()),
                    )
                    .await;
                    self.persist(instance_id, history).await;
                    return WaitOutcome::Retry;
                }
                continue;
            }

            tokio::select! {
                _ = notify.notified() => continue,
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            }
        }
    }

    async fn cleanup_on_cancel(&self, instance_id: &str, history: &Arc<AsyncMutex<RunHistory>>) {
        let (migration_id, candidate_id) = {
            let mut h = history.lock().await;
            h.cancel_requested = true;
            (h.manifest.migration_id.clone(), h.manifest.candidate.id.clone())
        };
        if let Err(e) = self
            .store
            .set_candidate_status(&migration_id, &candidate_id, CandidateStatus::NotStarted)
            .await
        {
            tracing::error!(target: "loom::engine", instance_id, error = %e, "cleanup cancel status write failed");
        }
        if let Err(e) = self.store.delete_run_history(instance_id).await {
            tracing::error!(target: "loom::engine", instance_id, error = %e, "failed to delete run history on cancel");
        }
        tracing::debug!(target: "loom::engine", instance_id, "run cancelled, candidate reverted to not_started");
    }

    async fn complete_run(&self, instance_id: &str, history: &Arc<AsyncMutex<RunHistory>>) {
        let (migration_id, candidate_id) = {
            let h = history.lock().await;
            (h.manifest.migration_id.clone(), h.manifest.candidate.id.clone())
        };
        if let Err(e) = self
            .store
            .set_candidate_status(&migration_id, &candidate_id, CandidateStatus::Completed)
            .await
        {
            tracing::error!(target: "loom::engine", instance_id, error = %e, "completion status write failed");
            return;
        }
        self.record_event(
            StepEventBuilder::new(&migration_id, &candidate_id, EventType::RunCompleted).build(Utc::now()),
        )
        .await;
        if let Err(e) = self.store.delete_run_history(instance_id).await {
            tracing::error!(target: "loom::engine", instance_id, error = %e, "failed to delete run history on completion");
        }
        tracing::debug!(target: "loom::engine", instance_id, "run completed");
    }

    async fn run(
        &self,
        instance_id: String,
        history: Arc<AsyncMutex<RunHistory>>,
        notify: Arc<Notify>,
        cancel: CancellationToken,
        status: Arc<AsyncRwLock<RunStatusSnapshot>>,
    ) {
        let (migration_id, candidate_id, needs_started_event) = {
            let mut h = history.lock().await;
            let needs = !h.started_event_recorded;
            h.started_event_recorded = true;
            (h.manifest.migration_id.clone(), h.manifest.candidate.id.clone(), needs)
        };
        if needs_started_event {
            self.persist(&instance_id, &history).await;
            self.record_event(
                StepEventBuilder::new(&migration_id, &candidate_id, EventType::RunStarted).build(Utc::now()),
            )
            .await;
        }

        let final_status = loop {
            let (cancel_requested, current_step) = {
                let h = history.lock().await;
                (h.cancel_requested, h.current_step_name())
            };

            if cancel.is_cancelled() || cancel_requested {
                self.cleanup_on_cancel(&instance_id, &history).await;
                break RuntimeStatus::Failed;
            }

            let Some(step_name) = current_step else {
                self.complete_run(&instance_id, &history).await;
                break RuntimeStatus::Completed;
            };

            self.dispatch_step(&instance_id, &history, &step_name, &cancel).await;
            self.refresh_status(&history, &status).await;

            match self.wait_for_decision(&instance_id, &history, &step_name, &notify, &cancel).await {
                WaitOutcome::Advance | WaitOutcome::Retry => {}
                WaitOutcome::Cancelled => {
                    self.cleanup_on_cancel(&instance_id, &history).await;
                    break RuntimeStatus::Failed;
                }
            }
            self.refresh_status(&history, &status).await;
        };

        status.write().await.runtime_status = final_status;
        self.runs.lock().unwrap().remove(&instance_id);
        tracing::debug!(target: "loom::engine", instance_id = %instance_id, status = ?final_status, "supervisor retired");
    }
}
