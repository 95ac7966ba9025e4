//! Error types for conda-env-manager

use thiserror::Error;

/// Errors that can occur in the conda environment manager
#[derive(Error, Debug)]
pub enum CondaError {
    /// No conda front-end found
    #[error("No conda front-end (conda, mamba, micromamba) is installed or in PATH")]
    CondaNotFound,

    /// Unknown front-end name
    #[error("Unknown conda front-end: {0}")]
    UnknownFrontend(String),

    /// Malformed interpreter version
    #[error("Invalid interpreter version '{0}': expected MAJOR.MINOR[.PATCH]")]
    InvalidInterpreterVersion(String),

    /// Unknown channel priority policy
    #[error("Invalid channel priority '{0}': expected strict, flexible or disabled")]
    InvalidChannelPriority(String),

    /// Environment descriptor rejected
    #[error("Invalid environment descriptor: {0}")]
    InvalidDescriptor(String),

    /// Requirements file not found
    #[error("Requirements file not found: {0}")]
    RequirementsNotFound(String),

    /// Requirement line rejected
    #[error("Invalid requirement on line {line}: {reason}")]
    InvalidRequirement { line: usize, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
