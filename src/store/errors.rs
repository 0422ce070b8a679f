//! Store error types.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the persistent store.
#[derive(Debug, Clone, Serialize, Error)]
#[serde(tag = "type", content = "details")]
pub enum StoreError {
    #[error("Migration not found: {migration_id}")]
    MigrationNotFound { migration_id: String },

    #[error("Candidate not found: {migration_id}/{candidate_id}")]
    CandidateNotFound {
        migration_id: String,
        candidate_id: String,
    },

    #[error("Migration has running candidates: {migration_id}")]
    MigrationHasRunningCandidates { migration_id: String },

    #[error("Snapshot I/O error: {message}")]
    SnapshotIo { message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MigrationNotFound { .. } => 404,
            Self::CandidateNotFound { .. } => 404,
            Self::MigrationHasRunningCandidates { .. } => 409,
            Self::SnapshotIo { .. } => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MigrationNotFound { .. } => "MIGRATION_NOT_FOUND",
            Self::CandidateNotFound { .. } => "CANDIDATE_NOT_FOUND",
            Self::MigrationHasRunningCandidates { .. } => "MIGRATION_HAS_RUNNING_CANDIDATES",
            Self::SnapshotIo { .. } => "SNAPSHOT_IO_ERROR",
        }
    }
}
