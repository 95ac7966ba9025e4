//! Step outcomes.

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageReport;
use crate::error::PipelineError;
use crate::plan::StepKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// What happened to one planned step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: StepKind,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Reports of a passed test step. Always empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<CoverageReport>,
}

impl StepOutcome {
    pub fn passed(step: StepKind, duration_ms: u64) -> Self {
        Self {
            step,
            status: StepStatus::Passed,
            duration_ms,
            detail: None,
            reports: Vec::new(),
        }
    }

    pub fn failed(step: StepKind, duration_ms: u64, error: &PipelineError) -> Self {
        Self {
            step,
            status: StepStatus::Failed,
            duration_ms,
            detail: Some(error.to_string()),
            reports: Vec::new(),
        }
    }

    pub fn skipped(step: StepKind, reason: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            duration_ms: 0,
            detail: Some(reason.into()),
            reports: Vec::new(),
        }
    }

    pub fn with_reports(mut self, reports: Vec<CoverageReport>) -> Self {
        self.reports = reports;
        self
    }
}
