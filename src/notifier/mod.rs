//! # Migrator Notifier
//!
//! The server's outbound edge: dispatching a step to the migrator that owns
//! it, and forwarding dry-run requests. Kept as a trait so the Orchestrator
//! never depends on `reqwest` directly and tests can substitute a loopback
//! double.
//!
//! ## Components
//!
//! - `errors`: `NotifierError`
//! - `http`: the `reqwest`-backed implementation used in production

pub mod errors;
pub mod http;

pub use errors::{NotifierError, NotifierResult};
pub use http::HttpNotifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::Candidate;

/// Server-to-migrator request for one step dispatch. Field names are
/// `camelCase` on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStepRequest {
    pub migration_id: String,
    pub step_name: String,
    pub step_config: HashMap<String, String>,
    pub candidate: Candidate,
    pub migrator_url: String,
    pub event_name: String,
    pub retry_event_name: String,
}

/// One simulated file change returned by a migrator's dry-run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunFileDiff {
    pub path: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// One step's simulated outcome within a dry-run response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunStepResult {
    pub step_name: String,
    #[serde(default)]
    pub files: Vec<DryRunFileDiff>,
    pub instructions: Option<String>,
}

/// Full dry-run response body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DryRunResult {
    pub steps: Vec<DryRunStepResult>,
}

/// Dispatches a step to its owning migrator. Implementations are expected
/// to treat a non-2xx response or a transport failure as retriable — the
/// Execution Engine's supervisor owns the retry/backoff policy, not this
/// port.
#[async_trait]
pub trait MigratorNotifier: Send + Sync {
    async fn dispatch(&self, req: &DispatchStepRequest) -> NotifierResult<()>;
}

/// Synchronous dry-run forwarding; purely read-side.
#[async_trait]
pub trait DryRunner: Send + Sync {
    async fn dry_run(&self, migrator_url: &str, candidate: &Candidate) -> NotifierResult<DryRunResult>;
}
