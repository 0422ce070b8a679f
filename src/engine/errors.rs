//! Execution Engine error types.

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, Error)]
#[serde(tag = "type", content = "details")]
pub enum EngineError {
    #[error("Run not found: {instance_id}")]
    RunNotFound { instance_id: String },

    #[error("Run already exists: {instance_id}")]
    AlreadyExists { instance_id: String },

    #[error("Transient engine error: {message}")]
    Transient { message: String },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Transient {
            message: e.to_string(),
        }
    }
}
