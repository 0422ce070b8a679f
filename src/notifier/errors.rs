//! Migrator Notifier error types.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Error)]
#[serde(tag = "type", content = "details")]
pub enum NotifierError {
    #[error("migrator at {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("migrator at {url} unreachable: {message}")]
    Transport { url: String, message: String },
}

pub type NotifierResult<T> = Result<T, NotifierError>;
