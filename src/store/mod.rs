//! # Persistent Store
//!
//! Migrations, candidates, the step-event ledger, and the run-history table
//! the Execution Engine uses for durability — all behind one trait so the
//! Service layer and the engine never see a concrete storage technology.
//!
//! ## Components
//!
//! - `errors`: `StoreError` and its HTTP/error-code mapping
//! - `memory`: the crate's persistence primitive — an `RwLock`-guarded,
//!   snapshot-to-disk implementation (see module docs for rationale)

pub mod errors;
pub mod memory;

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::{Candidate, CandidateStatus, Migration, RunHistory, StepEvent};

/// Persistent store port. Every operation is linearizable with respect to
/// other operations on the same `(migration_id, candidate_id)`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert a migration definition. Preserves the original `created_at`
    /// on re-announce; never touches candidate rows.
    async fn save_migration(&self, migration: Migration) -> StoreResult<()>;

    async fn get_migration(&self, migration_id: &str) -> StoreResult<Migration>;

    async fn list_migrations(&self) -> StoreResult<Vec<Migration>>;

    /// Deletes a migration and its candidates. Rejected with
    /// `MigrationHasRunningCandidates` if any candidate is `Running`.
    async fn delete_migration(&self, migration_id: &str) -> StoreResult<()>;

    /// Single-row status update. Fails with `CandidateNotFound` if the
    /// pair is absent. Atomic with respect to concurrent `save_candidates`.
    async fn set_candidate_status(
        &self,
        migration_id: &str,
        candidate_id: &str,
        status: CandidateStatus,
    ) -> StoreResult<()>;

    /// Transactional merge: existing `Running`/`Completed`
    /// rows are left untouched (including metadata); everything else is
    /// upserted as `NotStarted` with existing metadata keys winning over
    /// incoming ones. Rows already `Running`/`Completed` but absent from
    /// `incoming` are left present.
    async fn save_candidates(&self, migration_id: &str, incoming: Vec<Candidate>) -> StoreResult<()>;

    async fn get_candidates(&self, migration_id: &str) -> StoreResult<Vec<Candidate>>;

    async fn get_candidate(&self, migration_id: &str, candidate_id: &str) -> StoreResult<Candidate>;

    /// Deep-merges `kv` into the candidate's metadata map, incoming values
    /// winning — the precedence used for operator edits.
    async fn update_candidate_metadata(
        &self,
        migration_id: &str,
        candidate_id: &str,
        kv: HashMap<String, String>,
    ) -> StoreResult<()>;

    /// Insert-only. Rows are immutable once written.
    async fn record_event(&self, event: StepEvent) -> StoreResult<()>;

    async fn events_for(&self, migration_id: &str, candidate_id: &str) -> StoreResult<Vec<StepEvent>>;

    async fn all_events(&self) -> StoreResult<Vec<StepEvent>>;

    /// Persist the Execution Engine's durable state for one run. The
    /// engine calls this after every transition so a process restart can
    /// rehydrate from the last committed point.
    async fn save_run_history(&self, instance_id: &str, history: RunHistory) -> StoreResult<()>;

    async fn load_run_history(&self, instance_id: &str) -> StoreResult<Option<RunHistory>>;

    async fn delete_run_history(&self, instance_id: &str) -> StoreResult<()>;

    /// All run-history instance ids, used on startup to rehydrate
    /// supervisors for every candidate still `Running`.
    async fn list_run_history_ids(&self) -> StoreResult<Vec<String>>;
}
