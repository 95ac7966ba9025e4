//! Error types for condaci-state

use thiserror::Error;

/// Errors that can occur in the run ledger
#[derive(Error, Debug)]
pub enum StorageError {
    /// Run ID unknown to the ledger
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Operation not allowed in the run's current status
    #[error("Run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Digest string is not 64 hex characters
    #[error("Invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
