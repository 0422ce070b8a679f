//! # Execution Engine (port)
//!
//! Abstracts a durable workflow runtime: start, query, cancel, signal. The
//! only implementation in this crate is [`local::LocalEngine`], an
//! in-process Tokio-task supervisor; the trait exists so the Service layer
//! and tests never depend on that concrete mechanism.
//!
//! ## Components
//!
//! - `errors`: `EngineError`
//! - `local`: the in-process supervisor, one Tokio task per active run

pub mod errors;
pub mod local;

pub use errors::{EngineError, EngineResult};
pub use local::LocalEngine;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::{MigrationManifest, StepOutcome, StepStatus};

/// Runtime status of a run as seen from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Running,
    Completed,
    Failed,
    Unknown,
}

/// The live progress projection a running workflow exposes through its
/// `progress` query.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub current_step: Option<String>,
    pub step_outcomes: Vec<StepOutcome>,
}

/// `GetStatus` response.
#[derive(Debug, Clone)]
pub struct RunStatusSnapshot {
    pub runtime_status: RuntimeStatus,
    pub output: Option<RunProgress>,
}

/// The three named signal channels the Orchestrator workflow selects over.
#[derive(Debug, Clone)]
pub enum RunSignal {
    /// `stepEvent(stepName, candidateId)`.
    StepEvent {
        step_name: String,
        status: StepStatus,
        metadata: HashMap<String, String>,
    },
    /// `retry(stepName, candidateId)`.
    Retry { step_name: String },
    /// `updateInputs(candidateId)`.
    UpdateInputs { metadata: HashMap<String, String> },
}

/// Durable workflow runtime port. One workflow definition
/// (`MigrationOrchestrator`) is ever run against this engine in this crate,
/// so `StartRun` takes the manifest directly rather than a generic
/// `workflowName`/`input` pair.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Starts a run keyed by `instance_id`. Fails with `AlreadyExists` if a
    /// run with that id is already active — the deduplication enforces at
    /// most one active run per candidate.
    async fn start_run(&self, instance_id: &str, manifest: MigrationManifest) -> EngineResult<()>;

    /// Live status query. Returns `RunNotFound` once a run has reached a
    /// terminal state and been retired — callers fall back to the
    /// step-event ledger for historical progress.
    async fn get_status(&self, instance_id: &str) -> EngineResult<RunStatusSnapshot>;

    /// Requests graceful cancellation. The workflow observes it at its next
    /// suspension point; this call does not wait for cleanup to finish.
    async fn cancel_run(&self, instance_id: &str) -> EngineResult<()>;

    /// Delivers a signal, buffering it durably if the workflow is not
    /// currently selecting on the matching channel.
    async fn raise_event(&self, instance_id: &str, signal: RunSignal) -> EngineResult<()>;

    /// Rehydrates supervisors for every run the Store still has history
    /// for. Called once at server startup.
    async fn rehydrate(&self) -> EngineResult<()>;
}
