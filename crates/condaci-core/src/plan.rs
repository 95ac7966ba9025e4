//! Resolved pipeline plans.
//!
//! A plan is one matrix entry of a workflow with every default filled in and
//! every conditional step already decided. The runner executes plans; it never
//! looks at the workflow file.

use std::fmt;
use std::path::PathBuf;

use conda_env_manager::{EnvironmentDescriptor, InterpreterVersion};
use serde::{Deserialize, Serialize};

use crate::coverage::ReportFormat;
use crate::digest::{digest_of, DigestError};

/// The fixed step sequence of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Checkout,
    Provision,
    Install,
    Test,
    StrictReport,
}

impl StepKind {
    pub const ORDER: [StepKind; 5] = [
        StepKind::Checkout,
        StepKind::Provision,
        StepKind::Install,
        StepKind::Test,
        StepKind::StrictReport,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Checkout => "checkout",
            StepKind::Provision => "provision",
            StepKind::Install => "install",
            StepKind::Test => "test",
            StepKind::StrictReport => "strict-report",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// When a step is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StepCondition {
    Always,
    /// Runs only for the given interpreter version.
    PythonVersionEquals(InterpreterVersion),
}

impl StepCondition {
    /// Decide the condition for a matrix entry. Returns the skip reason when
    /// the step is not selected.
    pub fn evaluate(&self, version: &InterpreterVersion) -> Result<(), String> {
        match self {
            StepCondition::Always => Ok(()),
            StepCondition::PythonVersionEquals(pinned) if pinned == version => Ok(()),
            StepCondition::PythonVersionEquals(pinned) => Err(format!(
                "python-version {} does not match pinned {}",
                version, pinned
            )),
        }
    }
}

/// One step of a resolved plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub kind: StepKind,
    pub condition: StepCondition,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Coverage formats requested by test steps; empty for other kinds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub report_formats: Vec<ReportFormat>,
    /// 0 = unlimited.
    pub timeout_secs: u64,
}

impl PlannedStep {
    pub fn new(
        kind: StepKind,
        condition: StepCondition,
        version: &InterpreterVersion,
        timeout_secs: u64,
    ) -> Self {
        let skip_reason = condition.evaluate(version).err();
        Self {
            kind,
            condition,
            enabled: skip_reason.is_none(),
            skip_reason,
            report_formats: Vec::new(),
            timeout_secs,
        }
    }

    pub fn with_report_formats(mut self, formats: Vec<ReportFormat>) -> Self {
        self.report_formats = formats;
        self
    }
}

/// A single matrix entry, fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePlan {
    pub pipeline: String,
    /// Descriptor under its per-entry isolated name.
    pub environment: EnvironmentDescriptor,
    /// Requirements file, relative to the workspace.
    pub requirements: PathBuf,
    pub extra_tools: Vec<String>,
    pub test_target: String,
    pub coverage_scope: String,
    pub steps: Vec<PlannedStep>,
}

impl PipelinePlan {
    pub fn interpreter_version(&self) -> &InterpreterVersion {
        &self.environment.interpreter_version
    }

    pub fn step(&self, kind: StepKind) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    pub fn enabled_steps(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter().filter(|s| s.enabled)
    }

    /// Stable identity of the plan; equal plans always share a digest.
    pub fn digest(&self) -> Result<String, DigestError> {
        digest_of(self)
    }
}
