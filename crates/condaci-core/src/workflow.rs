//! Workflow file model (`condaci.toml`).
//!
//! The file declares triggers, an interpreter matrix, the environment, the
//! dependencies, the test invocation and an optional strict reporting step.
//! [`Workflow::plan`] turns one matrix entry into a [`PipelinePlan`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use conda_env_manager::{ChannelPriority, EnvironmentDescriptor, InterpreterVersion};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coverage::ReportFormat;
use crate::error::ConfigError;
use crate::plan::{PipelinePlan, PlannedStep, StepCondition, StepKind};

/// Default workflow file name.
pub const DEFAULT_WORKFLOW_FILE: &str = "condaci.toml";

/// Events that can start a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Push,
    PullRequest,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::Push => "push",
            TriggerEvent::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEvent {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "push" => Ok(TriggerEvent::Push),
            "pull_request" => Ok(TriggerEvent::PullRequest),
            other => Err(ConfigError::Invalid(format!(
                "unknown trigger event '{}': expected push or pull_request",
                other
            ))),
        }
    }
}

fn default_triggers() -> Vec<TriggerEvent> {
    vec![TriggerEvent::Push, TriggerEvent::PullRequest]
}

fn default_env_name() -> String {
    "testenv".to_string()
}

fn default_channel() -> String {
    "conda-forge".to_string()
}

fn default_requirements() -> PathBuf {
    PathBuf::from("requirements.txt")
}

fn default_extra_tools() -> Vec<String> {
    vec!["pytest".to_string(), "pytest-cov".to_string()]
}

fn default_test_formats() -> Vec<ReportFormat> {
    vec![ReportFormat::Term]
}

fn default_strict_formats() -> Vec<ReportFormat> {
    vec![ReportFormat::Xml, ReportFormat::Term]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MatrixConfig {
    pub python_version: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(default = "default_env_name")]
    pub name: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub channel_priority: ChannelPriority,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: default_env_name(),
            channel: default_channel(),
            channel_priority: ChannelPriority::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DependencyConfig {
    #[serde(default = "default_requirements")]
    pub requirements: PathBuf,
    #[serde(default = "default_extra_tools")]
    pub extra_tools: Vec<String>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            requirements: default_requirements(),
            extra_tools: default_extra_tools(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TestConfig {
    /// Test module or directory handed to pytest.
    pub target: String,
    /// Package measured by `--cov`.
    pub coverage_scope: String,
    #[serde(default = "default_test_formats")]
    pub report_formats: Vec<ReportFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StrictReportConfig {
    /// The only interpreter version the step runs for.
    pub python_version: String,
    #[serde(default = "default_strict_formats")]
    pub report_formats: Vec<ReportFormat>,
}

/// Per-step timeouts in seconds. 0 means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TimeoutConfig {
    #[serde(default)]
    pub provision_secs: u64,
    #[serde(default)]
    pub install_secs: u64,
    #[serde(default)]
    pub test_secs: u64,
}

/// A parsed workflow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Workflow {
    pub name: String,
    #[serde(default = "default_triggers")]
    pub on: Vec<TriggerEvent>,
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub dependencies: DependencyConfig,
    pub tests: TestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_report: Option<StrictReportConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Workflow {
    /// Parse and validate a workflow document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let workflow: Workflow = toml::from_str(content)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Read, parse and validate a workflow file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let workflow = Self::from_toml_str(&content)?;
        debug!(
            path = %path.display(),
            name = %workflow.name,
            entries = workflow.matrix.python_version.len(),
            "Loaded workflow"
        );
        Ok(workflow)
    }

    /// Check the rules that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name cannot be empty".to_string()));
        }
        if self.on.is_empty() {
            return Err(ConfigError::Invalid(
                "'on' must list at least one trigger event".to_string(),
            ));
        }

        let versions = self.matrix_versions()?;
        if versions.is_empty() {
            return Err(ConfigError::Invalid(
                "matrix.python-version must list at least one version".to_string(),
            ));
        }
        for (i, version) in versions.iter().enumerate() {
            if versions[..i].contains(version) {
                return Err(ConfigError::Invalid(format!(
                    "matrix.python-version lists {} more than once",
                    version
                )));
            }
        }

        // Name and channel rules live on the descriptor
        EnvironmentDescriptor::new(
            self.environment.name.clone(),
            versions[0].clone(),
            self.environment.channel.clone(),
            self.environment.channel_priority,
        )?;

        if self.tests.target.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "tests.target cannot be empty".to_string(),
            ));
        }
        if self.tests.coverage_scope.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "tests.coverage-scope cannot be empty".to_string(),
            ));
        }
        if self.tests.report_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "tests.report-formats cannot be empty".to_string(),
            ));
        }
        if self.dependencies.requirements.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "dependencies.requirements cannot be empty".to_string(),
            ));
        }
        if self.dependencies.extra_tools.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "dependencies.extra-tools contains an empty entry".to_string(),
            ));
        }

        if let Some(strict) = &self.strict_report {
            strict.python_version.parse::<InterpreterVersion>()?;
            if strict.report_formats.is_empty() {
                return Err(ConfigError::Invalid(
                    "strict-report.report-formats cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Non-fatal findings, e.g. a strict-report step that can never run.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(strict) = &self.strict_report {
            let pinned = strict.python_version.trim();
            if !self
                .matrix
                .python_version
                .iter()
                .any(|v| v.trim() == pinned)
            {
                warnings.push(format!(
                    "strict-report pins python-version {} which is not in the matrix; the step never runs",
                    pinned
                ));
            }
        }
        let tools = self.dependencies.extra_tools.join(" ");
        if !tools.contains("pytest-cov") {
            warnings.push(
                "dependencies.extra-tools does not include pytest-cov; coverage reports will fail"
                    .to_string(),
            );
        }
        warnings
    }

    /// Matrix versions in declaration order.
    pub fn matrix_versions(&self) -> Result<Vec<InterpreterVersion>, ConfigError> {
        self.matrix
            .python_version
            .iter()
            .map(|v| v.parse::<InterpreterVersion>().map_err(ConfigError::from))
            .collect()
    }

    pub fn is_triggered_by(&self, event: TriggerEvent) -> bool {
        self.on.contains(&event)
    }

    /// Descriptor for one matrix entry, named uniquely for that entry.
    pub fn descriptor_for(
        &self,
        version: &InterpreterVersion,
    ) -> Result<EnvironmentDescriptor, ConfigError> {
        let descriptor = EnvironmentDescriptor::new(
            self.environment.name.clone(),
            version.clone(),
            self.environment.channel.clone(),
            self.environment.channel_priority,
        )?;
        Ok(descriptor.isolated_for_matrix())
    }

    /// Resolve one matrix entry. Conditional steps are decided here, before
    /// anything runs.
    pub fn plan(&self, version: &InterpreterVersion) -> Result<PipelinePlan, ConfigError> {
        let environment = self.descriptor_for(version)?;
        let always = || StepCondition::Always;

        let mut steps = vec![
            PlannedStep::new(StepKind::Checkout, always(), version, 0),
            PlannedStep::new(
                StepKind::Provision,
                always(),
                version,
                self.timeouts.provision_secs,
            ),
            PlannedStep::new(
                StepKind::Install,
                always(),
                version,
                self.timeouts.install_secs,
            ),
            PlannedStep::new(StepKind::Test, always(), version, self.timeouts.test_secs)
                .with_report_formats(self.tests.report_formats.clone()),
        ];

        if let Some(strict) = &self.strict_report {
            let pinned: InterpreterVersion = strict.python_version.parse()?;
            steps.push(
                PlannedStep::new(
                    StepKind::StrictReport,
                    StepCondition::PythonVersionEquals(pinned),
                    version,
                    self.timeouts.test_secs,
                )
                .with_report_formats(strict.report_formats.clone()),
            );
        }

        Ok(PipelinePlan {
            pipeline: self.name.clone(),
            environment,
            requirements: self.dependencies.requirements.clone(),
            extra_tools: self.dependencies.extra_tools.clone(),
            test_target: self.tests.target.clone(),
            coverage_scope: self.tests.coverage_scope.clone(),
            steps,
        })
    }

    /// One plan per matrix entry, in matrix order.
    pub fn plan_all(&self) -> Result<Vec<PipelinePlan>, ConfigError> {
        self.matrix_versions()?
            .iter()
            .map(|v| self.plan(v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RTLIVE: &str = r#"
name = "rtlive"
on = ["push", "pull_request"]

[matrix]
python-version = ["3.7"]

[environment]
name = "testenv"
channel = "conda-forge"
channel-priority = "strict"

[dependencies]
requirements = "requirements.txt"
extra-tools = ["pytest", "pytest-cov"]

[tests]
target = "rtlive/tests.py"
coverage-scope = "rtlive"
report-formats = ["term"]

[strict-report]
python-version = "3.7"
report-formats = ["xml", "term"]
"#;

    const MINIMAL: &str = r#"
name = "mini"

[matrix]
python-version = ["3.7", "3.8"]

[tests]
target = "tests"
coverage-scope = "mini"

[strict-report]
python-version = "3.7"
"#;

    fn v(s: &str) -> InterpreterVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_full_workflow() {
        let wf = Workflow::from_toml_str(RTLIVE).unwrap();
        assert_eq!(wf.name, "rtlive");
        assert_eq!(wf.on, vec![TriggerEvent::Push, TriggerEvent::PullRequest]);
        assert_eq!(wf.environment.channel_priority, ChannelPriority::Strict);
        assert_eq!(wf.tests.report_formats, vec![ReportFormat::Term]);
        let strict = wf.strict_report.as_ref().unwrap();
        assert_eq!(
            strict.report_formats,
            vec![ReportFormat::Xml, ReportFormat::Term]
        );
        assert!(wf.warnings().is_empty());
    }

    #[test]
    fn test_defaults_applied() {
        let wf = Workflow::from_toml_str(MINIMAL).unwrap();
        assert_eq!(wf.on, default_triggers());
        assert_eq!(wf.environment.name, "testenv");
        assert_eq!(wf.environment.channel, "conda-forge");
        assert_eq!(wf.dependencies.requirements, PathBuf::from("requirements.txt"));
        assert_eq!(wf.dependencies.extra_tools, vec!["pytest", "pytest-cov"]);
        assert_eq!(wf.tests.report_formats, vec![ReportFormat::Term]);
        assert_eq!(
            wf.strict_report.unwrap().report_formats,
            vec![ReportFormat::Xml, ReportFormat::Term]
        );
        assert_eq!(wf.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        let cases = [
            (RTLIVE.replace("name = \"rtlive\"", "name = \" \""), "name"),
            (
                RTLIVE.replace("python-version = [\"3.7\"]", "python-version = []"),
                "at least one",
            ),
            (
                RTLIVE.replace("python-version = [\"3.7\"]", "python-version = [\"3.7\", \"3.7\"]"),
                "more than once",
            ),
            (
                RTLIVE.replace("python-version = [\"3.7\"]", "python-version = [\"three\"]"),
                "three",
            ),
            (
                RTLIVE.replace("target = \"rtlive/tests.py\"", "target = \"\""),
                "tests.target",
            ),
            (
                RTLIVE.replace("report-formats = [\"term\"]", "report-formats = []"),
                "tests.report-formats",
            ),
        ];
        for (doc, needle) in cases {
            let err = Workflow::from_toml_str(&doc).unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "expected '{}' in '{}'",
                needle,
                err
            );
        }
    }

    #[test]
    fn test_unknown_keys_and_formats_rejected() {
        let doc = RTLIVE.replace("coverage-scope", "coverage_scope");
        assert!(matches!(
            Workflow::from_toml_str(&doc),
            Err(ConfigError::Parse(_))
        ));
        let doc = RTLIVE.replace("[\"xml\", \"term\"]", "[\"html\"]");
        assert!(matches!(
            Workflow::from_toml_str(&doc),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_strict_report_outside_matrix_is_warning() {
        let doc = RTLIVE.replace(
            "[strict-report]\npython-version = \"3.7\"",
            "[strict-report]\npython-version = \"3.9\"",
        );
        let wf = Workflow::from_toml_str(&doc).unwrap();
        let warnings = wf.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("3.9"));
    }

    #[test]
    fn test_triggers() {
        let doc = RTLIVE.replace("on = [\"push\", \"pull_request\"]", "on = [\"push\"]");
        let wf = Workflow::from_toml_str(&doc).unwrap();
        assert!(wf.is_triggered_by(TriggerEvent::Push));
        assert!(!wf.is_triggered_by(TriggerEvent::PullRequest));
        assert_eq!(
            "pull-request".parse::<TriggerEvent>().unwrap(),
            TriggerEvent::PullRequest
        );
        assert!("schedule".parse::<TriggerEvent>().is_err());
    }

    #[test]
    fn test_plan_selects_strict_report_only_for_pinned_version() {
        let wf = Workflow::from_toml_str(MINIMAL).unwrap();
        let plans = wf.plan_all().unwrap();
        assert_eq!(plans.len(), 2);

        let py37 = &plans[0];
        assert_eq!(py37.environment.name, "testenv-py37");
        assert!(py37.step(StepKind::StrictReport).unwrap().enabled);

        let py38 = &plans[1];
        assert_eq!(py38.environment.name, "testenv-py38");
        let strict = py38.step(StepKind::StrictReport).unwrap();
        assert!(!strict.enabled);
        assert!(strict.skip_reason.as_deref().unwrap().contains("3.8"));

        let kinds: Vec<_> = py38.enabled_steps().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Checkout,
                StepKind::Provision,
                StepKind::Install,
                StepKind::Test
            ]
        );
    }

    #[test]
    fn test_plan_without_strict_report_has_four_steps() {
        let doc = MINIMAL.replace("[strict-report]\npython-version = \"3.7\"\n", "");
        let wf = Workflow::from_toml_str(&doc).unwrap();
        let plan = wf.plan(&v("3.8")).unwrap();
        assert_eq!(plan.steps.len(), 4);
        assert!(plan.step(StepKind::StrictReport).is_none());
    }

    #[test]
    fn test_plan_digest_is_deterministic() {
        let wf = Workflow::from_toml_str(RTLIVE).unwrap();
        let a = wf.plan(&v("3.7")).unwrap();
        let b = Workflow::from_toml_str(RTLIVE).unwrap().plan(&v("3.7")).unwrap();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        let other = wf.plan(&v("3.8")).unwrap();
        assert_ne!(a.digest().unwrap(), other.digest().unwrap());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_WORKFLOW_FILE);
        std::fs::write(&path, RTLIVE).unwrap();
        let wf = Workflow::load(&path).unwrap();
        assert_eq!(wf.name, "rtlive");

        let missing = Workflow::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
