//! condaci-runner: pipeline execution for condaci
//!
//! Provides a pipeline orchestrator that:
//! - Provisions a pinned conda environment per matrix entry
//! - Installs requirements and test tooling, then runs pytest under coverage
//! - Records every step as a ledger run event
//! - Evaluates recorded runs against the CI gate

pub mod executor;
pub mod fakes;
pub mod gate;
pub mod matrix;
pub mod pipeline;
pub mod recorder;
pub mod runner;
pub mod spec;

// Re-export key types
pub use executor::{CommandExecutor, CommandOutput, CommandSpec, ExecError, ProcessExecutor};
pub use gate::{CiGate, GateVerdict};
pub use matrix::{MatrixResult, MatrixRunner};
pub use pipeline::{Pipeline, PipelineResult};
pub use recorder::RunRecorder;
pub use runner::{
    PipelineRunner, PreparedEnvironment, ProvisionedEnvironment, RunnerConfig, TestInvocation,
};
pub use spec::{workspace_git_sha, RunIdentity, UNKNOWN_GIT_SHA};
