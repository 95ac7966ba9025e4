//! Error taxonomy for condaci.

use conda_env_manager::CondaError;
use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating a workflow.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read workflow {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workflow: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid workflow: {0}")]
    Invalid(String),

    #[error("invalid environment: {0}")]
    Environment(#[from] CondaError),
}

/// Kind of a fatal pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Checkout,
    Provisioning,
    DependencyResolution,
    TestFailure,
    CoverageTool,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Checkout => "checkout",
            ErrorKind::Provisioning => "provisioning",
            ErrorKind::DependencyResolution => "dependency_resolution",
            ErrorKind::TestFailure => "test_failure",
            ErrorKind::CoverageTool => "coverage_tool",
        }
    }
}

/// A step failure. Every variant is fatal to the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineError {
    /// Source tree could not be retrieved.
    #[error("checkout failed in step '{step}': {message}")]
    Checkout { step: String, message: String },

    /// Interpreter version, channel or conda front-end unavailable.
    #[error("provisioning failed in step '{step}': {message}")]
    Provisioning { step: String, message: String },

    /// Conflicting or unreachable packages, or tooling that cannot be imported.
    #[error("dependency resolution failed in step '{step}': {message}")]
    DependencyResolution { step: String, message: String },

    /// One or more test cases failed, or the suite could not run.
    #[error("tests failed in step '{step}' (exit code {exit_code}): {message}")]
    TestFailure {
        step: String,
        exit_code: i32,
        message: String,
    },

    /// Coverage report generation failed.
    #[error("coverage report generation failed in step '{step}': {message}")]
    CoverageTool { step: String, message: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Checkout { .. } => ErrorKind::Checkout,
            PipelineError::Provisioning { .. } => ErrorKind::Provisioning,
            PipelineError::DependencyResolution { .. } => ErrorKind::DependencyResolution,
            PipelineError::TestFailure { .. } => ErrorKind::TestFailure,
            PipelineError::CoverageTool { .. } => ErrorKind::CoverageTool,
        }
    }

    /// Name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            PipelineError::Checkout { step, .. }
            | PipelineError::Provisioning { step, .. }
            | PipelineError::DependencyResolution { step, .. }
            | PipelineError::TestFailure { step, .. }
            | PipelineError::CoverageTool { step, .. } => step,
        }
    }
}
