// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid record state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
