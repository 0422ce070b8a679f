//! Use-case error taxonomy.

use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::notifier::NotifierError;
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, Error)]
#[serde(tag = "type", content = "details")]
pub enum ServiceError {
    #[error("Unknown migration: {migration_id}")]
    MigrationNotFound { migration_id: String },

    #[error("Unknown candidate {candidate_id} under migration {migration_id}")]
    CandidateNotFound { migration_id: String, candidate_id: String },

    #[error("Candidate {candidate_id} is already running or completed")]
    CandidateAlreadyRun { migration_id: String, candidate_id: String },

    #[error("Candidate {candidate_id} is not running")]
    CandidateNotRunning { migration_id: String, candidate_id: String },

    #[error("No active run for {migration_id}/{candidate_id}")]
    RunNotFound { migration_id: String, candidate_id: String },

    #[error("Unknown input key: {name}")]
    InvalidInputKey { name: String },

    #[error("Migration {migration_id} still has running candidates")]
    MigrationHasRunningCandidates { migration_id: String },

    #[error("infrastructure error: {message}")]
    Internal { message: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::MigrationNotFound { .. } => 404,
            ServiceError::CandidateNotFound { .. } => 404,
            ServiceError::CandidateAlreadyRun { .. } => 409,
            ServiceError::CandidateNotRunning { .. } => 409,
            ServiceError::RunNotFound { .. } => 202,
            ServiceError::InvalidInputKey { .. } => 400,
            ServiceError::MigrationHasRunningCandidates { .. } => 409,
            ServiceError::Internal { .. } => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::MigrationNotFound { .. } => "migration_not_found",
            ServiceError::CandidateNotFound { .. } => "candidate_not_found",
            ServiceError::CandidateAlreadyRun { .. } => "candidate_already_run",
            ServiceError::CandidateNotRunning { .. } => "candidate_not_running",
            ServiceError::RunNotFound { .. } => "run_not_found",
            ServiceError::InvalidInputKey { .. } => "invalid_input_key",
            ServiceError::MigrationHasRunningCandidates { .. } => "migration_has_running_candidates",
            ServiceError::Internal { .. } => "internal",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MigrationNotFound { migration_id } => ServiceError::MigrationNotFound { migration_id },
            StoreError::CandidateNotFound { migration_id, candidate_id } => {
                ServiceError::CandidateNotFound { migration_id, candidate_id }
            }
            StoreError::MigrationHasRunningCandidates { migration_id } => {
                ServiceError::MigrationHasRunningCandidates { migration_id }
            }
            other => ServiceError::Internal { message: other.to_string() },
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        ServiceError::Internal { message: e.to_string() }
    }
}

impl From<NotifierError> for ServiceError {
    fn from(e: NotifierError) -> Self {
        ServiceError::Internal { message: e.to_string() }
    }
}
