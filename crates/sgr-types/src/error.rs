use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid uuid string: {0}")]
    InvalidUuid(String),

    #[error("invalid matrix: expected {expected} elements, got {actual}")]
    InvalidMatrix { expected: usize, actual: usize },

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}
