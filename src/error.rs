//! Crate-wide error type carrying the symbolic error kinds from the design.
//!
//! Background loops (scheduler tick, retention, hub) only ever see
//! [`TaskflowError::StorageTransient`] from store calls — they log it and
//! continue, never propagate it up as a panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskflowError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("unauthorized")]
    Unauthorized,

    #[error("storage error: {0}")]
    StorageTransient(String),
}

impl From<diesel::result::Error> for TaskflowError {
    fn from(e: diesel::result::Error) -> Self {
        TaskflowError::StorageTransient(e.to_string())
    }
}

impl From<diesel::r2d2::Error> for TaskflowError {
    fn from(e: diesel::r2d2::Error) -> Self {
        TaskflowError::StorageTransient(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskflowError>;
