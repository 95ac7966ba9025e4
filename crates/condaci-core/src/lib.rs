//! condaci-core: workflow model, planning and reporting for condaci
//!
//! Everything the runner needs to know before it executes a command lives
//! here: the workflow file, the resolved per-entry plan, the coverage model,
//! the error taxonomy and the tracing setup shared by the binaries.
//!
//! ## Layer 1 - Domain
//!
//! Focus: Deterministic plans and a closed set of failure kinds.

pub mod coverage;
pub mod digest;
pub mod error;
pub mod git;
pub mod obs;
pub mod plan;
pub mod result;
pub mod telemetry;
pub mod workflow;

pub use conda_env_manager::{
    ChannelPriority, EnvironmentDescriptor, InterpreterVersion, RequirementList,
};
pub use coverage::{
    classify_test_exit, parse_terminal_total, parse_test_summary, parse_xml_total,
    CoverageReport, ReportFormat, TestExit, TestSummary,
};
pub use digest::{canonical_json, compute_digest, digest_of, DigestError};
pub use error::{ConfigError, ErrorKind, PipelineError};
pub use git::{read_revision, GitError, Revision};
pub use plan::{PipelinePlan, PlannedStep, StepCondition, StepKind};
pub use result::{StepOutcome, StepStatus};
pub use workflow::{TriggerEvent, Workflow, DEFAULT_WORKFLOW_FILE};
