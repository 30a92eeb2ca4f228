//! Error types for the diff engine

use thiserror::Error;

/// Result type alias using DiffError
pub type Result<T> = std::result::Result<T, DiffError>;

/// Errors raised while applying a diff
///
/// Structural precondition failures are reported by
/// [`ValidationError`](crate::validation::ValidationError) instead; these
/// cover what can only be discovered during mutation or outside any single
/// operation.
#[derive(Debug, Error)]
pub enum DiffError {
    /// An operation could not be applied to the working copy
    #[error("{0}")]
    Apply(String),

    /// The request or workflow document could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected failure outside any single operation
    #[error("{0}")]
    Engine(String),
}

impl DiffError {
    /// Create an apply error with a message
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create an engine error with a message
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }
}
