//! Typed pipeline operations.
//!
//! Each operation runs one or more conda commands through the executor and
//! maps every failure onto a [`PipelineError`] of its step. The environment
//! types form a chain: only [`PipelineRunner::provision_environment`] makes a
//! [`ProvisionedEnvironment`], only [`PipelineRunner::install_dependencies`]
//! turns it into a [`PreparedEnvironment`], and tests only run in the latter.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use conda_env_manager::{distribution_names, CondaCli, EnvironmentDescriptor, RequirementList};
use condaci_core::coverage::{
    classify_test_exit, coverage_data_file, parse_terminal_total, parse_test_summary,
    parse_xml_total, xml_report_file, CoverageReport, ReportFormat, TestExit,
};
use condaci_core::{PipelineError, PipelinePlan, StepKind};
use tracing::{debug, info, warn};

use crate::executor::{CommandExecutor, CommandOutput, CommandSpec, ExecError};

/// Output lines quoted in error messages.
const EXCERPT_LINES: usize = 15;

/// Modules `run_tests` drives pytest and coverage through.
const TEST_TOOLING_MODULES: [&str; 2] = ["pytest", "pytest_cov"];

/// Options shared by every run the runner executes.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Front-end and executable used for every conda command.
    pub conda: CondaCli,
    /// Checked-out source tree; commands run here.
    pub workspace: PathBuf,
    /// Leave environments in place after the run.
    pub keep_environment: bool,
}

impl RunnerConfig {
    pub fn new(conda: CondaCli, workspace: impl Into<PathBuf>) -> Self {
        Self {
            conda,
            workspace: workspace.into(),
            keep_environment: false,
        }
    }

    pub fn keep_environment(mut self, keep: bool) -> Self {
        self.keep_environment = keep;
        self
    }
}

/// An environment that exists with its pinned interpreter but no packages.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedEnvironment {
    descriptor: EnvironmentDescriptor,
}

impl ProvisionedEnvironment {
    pub fn descriptor(&self) -> &EnvironmentDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// An environment with requirements installed and test tooling verified.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedEnvironment {
    descriptor: EnvironmentDescriptor,
    requirements: RequirementList,
    extra_tools: Vec<String>,
}

impl PreparedEnvironment {
    pub fn descriptor(&self) -> &EnvironmentDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn requirements(&self) -> &RequirementList {
        &self.requirements
    }

    pub fn extra_tools(&self) -> &[String] {
        &self.extra_tools
    }
}

/// One pytest invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TestInvocation {
    pub step: StepKind,
    /// Test module or directory.
    pub target: String,
    /// Package measured by `--cov`.
    pub coverage_scope: String,
    pub report_formats: Vec<ReportFormat>,
    pub timeout_secs: u64,
}

impl TestInvocation {
    /// The invocation a plan declares for `step`.
    pub fn from_plan(plan: &PipelinePlan, step: StepKind) -> Self {
        let planned = plan.step(step);
        Self {
            step,
            target: plan.test_target.clone(),
            coverage_scope: plan.coverage_scope.clone(),
            report_formats: planned
                .map(|s| s.report_formats.clone())
                .unwrap_or_default(),
            timeout_secs: planned.map(|s| s.timeout_secs).unwrap_or(0),
        }
    }

    /// pytest arguments after `python -m`; exchange reports go to `xml_report`.
    pub fn pytest_args(&self, xml_report: &str) -> Vec<String> {
        let mut args = vec![
            "pytest".to_string(),
            "-v".to_string(),
            format!("--cov={}", self.coverage_scope),
        ];
        for format in &self.report_formats {
            args.push(format!("--cov-report={}", format.cov_report_arg(Some(xml_report))));
        }
        args.push(self.target.clone());
        args
    }

    fn wants_xml(&self) -> bool {
        self.report_formats.iter().any(|f| f.is_exchange())
    }
}

/// Executes the operations of a pipeline against one executor.
pub struct PipelineRunner {
    executor: Arc<dyn CommandExecutor>,
    config: RunnerConfig,
}

impl PipelineRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: RunnerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        self.executor.clone()
    }

    fn command(&self, argv: Vec<String>, timeout_secs: u64) -> CommandSpec {
        CommandSpec::new(argv)
            .in_dir(&self.config.workspace)
            .with_timeout(timeout_secs)
    }

    /// Make sure the source tree the plan refers to is present.
    pub async fn checkout(&self, plan: &PipelinePlan) -> Result<(), PipelineError> {
        let step = StepKind::Checkout.name();
        let workspace = &self.config.workspace;
        if !is_dir(workspace).await {
            return Err(PipelineError::Checkout {
                step: step.to_string(),
                message: format!("workspace {} is not a directory", workspace.display()),
            });
        }
        let requirements_dir = workspace
            .join(&plan.requirements)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workspace.clone());
        if !is_dir(&requirements_dir).await {
            return Err(PipelineError::Checkout {
                step: step.to_string(),
                message: format!(
                    "directory {} of the requirements file is missing from the checkout",
                    requirements_dir.display()
                ),
            });
        }
        debug!(workspace = %workspace.display(), "Source tree present");
        Ok(())
    }

    /// Create the environment with its pinned interpreter.
    pub async fn provision_environment(
        &self,
        descriptor: &EnvironmentDescriptor,
        timeout_secs: u64,
    ) -> Result<ProvisionedEnvironment, PipelineError> {
        let step = StepKind::Provision.name();
        let spec = self.command(self.config.conda.create_command(descriptor), timeout_secs);
        info!(
            env = %descriptor.name,
            python = %descriptor.interpreter_version,
            channel = %descriptor.channel,
            priority = %descriptor.channel_priority,
            "Provisioning environment"
        );

        let output = self
            .executor
            .execute(&spec)
            .await
            .map_err(|e| PipelineError::Provisioning {
                step: step.to_string(),
                message: e.to_string(),
            })?;

        if !output.success() {
            return Err(PipelineError::Provisioning {
                step: step.to_string(),
                message: format!(
                    "could not create '{}' with {} from channel {} (exit code {}):\n{}",
                    descriptor.name,
                    descriptor.interpreter_spec(),
                    descriptor.channel,
                    output.exit_code,
                    output.excerpt(EXCERPT_LINES)
                ),
            });
        }

        Ok(ProvisionedEnvironment {
            descriptor: descriptor.clone(),
        })
    }

    /// Install the requirements file and the test tooling, then prove every
    /// tool is installed and pytest with its coverage plugin imports.
    pub async fn install_dependencies(
        &self,
        env: &ProvisionedEnvironment,
        requirements: &Path,
        extra_tools: &[String],
        timeout_secs: u64,
    ) -> Result<PreparedEnvironment, PipelineError> {
        let step = StepKind::Install.name();
        let resolution_error = |message: String| PipelineError::DependencyResolution {
            step: step.to_string(),
            message,
        };

        let requirements_path = self.config.workspace.join(requirements);
        let requirement_list =
            RequirementList::from_file(&requirements_path).map_err(|e| resolution_error(e.to_string()))?;
        info!(
            env = %env.name(),
            requirements = requirement_list.len(),
            tools = ?extra_tools,
            "Installing dependencies"
        );

        let install = self.command(
            self.config
                .conda
                .pip_install_command(env.name(), &requirements_path, extra_tools),
            timeout_secs,
        );
        let output = self
            .executor
            .execute(&install)
            .await
            .map_err(|e| resolution_error(e.to_string()))?;
        if !output.success() {
            return Err(resolution_error(format!(
                "pip install failed (exit code {}):\n{}",
                output.exit_code,
                output.excerpt(EXCERPT_LINES)
            )));
        }

        let dists = distribution_names(extra_tools);
        if !dists.is_empty() {
            let check = self.command(
                self.config.conda.distribution_check_command(env.name(), &dists),
                timeout_secs,
            );
            let output = self
                .executor
                .execute(&check)
                .await
                .map_err(|e| resolution_error(e.to_string()))?;
            if !output.success() {
                return Err(resolution_error(format!(
                    "test tooling is not installed ({}):\n{}",
                    dists.join(", "),
                    output.excerpt(EXCERPT_LINES)
                )));
            }
        }

        let modules: Vec<String> = TEST_TOOLING_MODULES.iter().map(|m| m.to_string()).collect();
        let check = self.command(
            self.config.conda.import_check_command(env.name(), &modules),
            timeout_secs,
        );
        let output = self
            .executor
            .execute(&check)
            .await
            .map_err(|e| resolution_error(e.to_string()))?;
        if !output.success() {
            return Err(resolution_error(format!(
                "test tooling cannot be imported ({}):\n{}",
                modules.join(", "),
                output.excerpt(EXCERPT_LINES)
            )));
        }
        debug!(env = %env.name(), dists = ?dists, "Test tooling verified");

        Ok(PreparedEnvironment {
            descriptor: env.descriptor.clone(),
            requirements: requirement_list,
            extra_tools: extra_tools.to_vec(),
        })
    }

    /// Run the test suite under coverage. Reports are returned only when the
    /// suite passed and every requested report was produced.
    pub async fn run_tests(
        &self,
        env: &PreparedEnvironment,
        invocation: &TestInvocation,
    ) -> Result<Vec<CoverageReport>, PipelineError> {
        let step = invocation.step.name();
        // Matrix entries share the workspace; coverage data and reports are per environment
        let xml_report = xml_report_file(env.name());
        let xml_path = self.config.workspace.join(&xml_report);
        let data_file = self.config.workspace.join(coverage_data_file(env.name()));

        if invocation.wants_xml() {
            // A report left over from an earlier run must not pass for this one
            remove_report(&xml_path)
                .await
                .map_err(|e| PipelineError::CoverageTool {
                    step: step.to_string(),
                    message: format!("cannot clear stale {}: {}", xml_path.display(), e),
                })?;
        }

        let spec = self
            .command(
                self.config
                    .conda
                    .run_command(env.name(), &python_module(invocation.pytest_args(&xml_report))),
                invocation.timeout_secs,
            )
            .with_env("COVERAGE_FILE", data_file.display().to_string());
        info!(env = %env.name(), step = %step, target = %invocation.target, "Running tests");

        let output = match self.executor.execute(&spec).await {
            Ok(output) => output,
            Err(e) => {
                self.discard_report(invocation, &xml_path).await;
                return Err(PipelineError::TestFailure {
                    step: step.to_string(),
                    exit_code: -1,
                    message: e.to_string(),
                });
            }
        };

        match classify_test_exit(output.exit_code, &output.combined()) {
            TestExit::Passed => {}
            TestExit::TestsFailed => {
                self.discard_report(invocation, &xml_path).await;
                return Err(PipelineError::TestFailure {
                    step: step.to_string(),
                    exit_code: output.exit_code,
                    message: test_failure_message(&output),
                });
            }
            TestExit::CoverageFailed => {
                self.discard_report(invocation, &xml_path).await;
                return Err(PipelineError::CoverageTool {
                    step: step.to_string(),
                    message: output.excerpt(EXCERPT_LINES),
                });
            }
        }

        let mut reports = Vec::with_capacity(invocation.report_formats.len());
        for format in &invocation.report_formats {
            let report = match format {
                ReportFormat::Term | ReportFormat::TermMissing => CoverageReport {
                    format: *format,
                    total_percent: parse_terminal_total(&output.stdout),
                    path: None,
                },
                ReportFormat::Xml => match read_xml_report(&xml_path).await {
                    Ok(report) => report,
                    Err(message) => {
                        self.discard_report(invocation, &xml_path).await;
                        return Err(PipelineError::CoverageTool {
                            step: step.to_string(),
                            message,
                        });
                    }
                },
            };
            reports.push(report);
        }

        info!(
            env = %env.name(),
            step = %step,
            total = ?reports.iter().find_map(|r| r.total_percent),
            "Tests passed"
        );
        Ok(reports)
    }

    /// Remove the environment. Errors are reported to the caller, which only
    /// logs them.
    pub async fn teardown(&self, env_name: &str) -> Result<(), ExecError> {
        if self.config.keep_environment {
            info!(env = %env_name, "Keeping environment");
            return Ok(());
        }
        let spec = self.command(self.config.conda.remove_command(env_name), 0);
        let output = self.executor.execute(&spec).await?;
        if !output.success() {
            return Err(ExecError::Failed {
                program: spec.program().to_string(),
                exit_code: output.exit_code,
                detail: output.excerpt(3),
            });
        }
        debug!(env = %env_name, "Environment removed");
        Ok(())
    }

    async fn discard_report(&self, invocation: &TestInvocation, xml_path: &Path) {
        if !invocation.wants_xml() {
            return;
        }
        if let Err(e) = remove_report(xml_path).await {
            warn!(path = %xml_path.display(), error = %e, "Could not remove report of failed step");
        }
    }
}

fn python_module(args: Vec<String>) -> Vec<String> {
    let mut argv = vec!["python".to_string(), "-m".to_string()];
    argv.extend(args);
    argv
}

fn test_failure_message(output: &CommandOutput) -> String {
    match parse_test_summary(&output.stdout) {
        Some(summary) if summary.has_failures() => format!(
            "{} failed, {} errors, {} passed",
            summary.failed, summary.errors, summary.passed
        ),
        _ => output.excerpt(EXCERPT_LINES),
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn remove_report(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn read_xml_report(path: &Path) -> Result<CoverageReport, String> {
    let xml = match tokio::fs::read_to_string(path).await {
        Ok(xml) => xml,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(format!("{} was not written", path.display()))
        }
        Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
    };
    let total = parse_xml_total(&xml)
        .ok_or_else(|| format!("{} has no valid line-rate", path.display()))?;
    Ok(CoverageReport {
        format: ReportFormat::Xml,
        total_percent: Some(total),
        path: Some(path.to_path_buf()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptRule, ScriptedExecutor};
    use conda_env_manager::{ChannelPriority, CondaFrontend};

    fn descriptor() -> EnvironmentDescriptor {
        EnvironmentDescriptor::new(
            "testenv-py37",
            "3.7".parse().unwrap(),
            "conda-forge",
            ChannelPriority::Strict,
        )
        .unwrap()
    }

    fn runner(executor: Arc<ScriptedExecutor>, workspace: &Path) -> PipelineRunner {
        PipelineRunner::new(
            executor,
            RunnerConfig::new(CondaCli::new(CondaFrontend::Conda), workspace),
        )
    }

    fn invocation(formats: Vec<ReportFormat>) -> TestInvocation {
        TestInvocation {
            step: StepKind::Test,
            target: "rtlive/tests.py".to_string(),
            coverage_scope: "rtlive".to_string(),
            report_formats: formats,
            timeout_secs: 0,
        }
    }

    async fn prepared(runner: &PipelineRunner, workspace: &Path) -> PreparedEnvironment {
        std::fs::write(workspace.join("requirements.txt"), "numpy\n").unwrap();
        let env = runner.provision_environment(&descriptor(), 0).await.unwrap();
        runner
            .install_dependencies(
                &env,
                Path::new("requirements.txt"),
                &["pytest".to_string(), "pytest-cov".to_string()],
                0,
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_pytest_args() {
        let args = invocation(vec![ReportFormat::Xml, ReportFormat::Term])
            .pytest_args("coverage-testenv-py37.xml");
        assert_eq!(
            args,
            vec![
                "pytest",
                "-v",
                "--cov=rtlive",
                "--cov-report=xml:coverage-testenv-py37.xml",
                "--cov-report=term",
                "rtlive/tests.py"
            ]
        );
    }

    #[tokio::test]
    async fn test_provision_failure_is_provisioning_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new().rule(
            ScriptRule::on(" create ")
                .exit_code(1)
                .stderr("PackagesNotFoundError: python=3.7"),
        ));
        let err = runner(exec, dir.path())
            .provision_environment(&descriptor(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Provisioning { .. }));
        assert!(err.to_string().contains("PackagesNotFoundError"));
    }

    #[tokio::test]
    async fn test_missing_requirements_is_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        let runner = runner(exec.clone(), dir.path());
        let env = runner.provision_environment(&descriptor(), 0).await.unwrap();
        let err = runner
            .install_dependencies(&env, Path::new("requirements.txt"), &[], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyResolution { .. }));
        // Nothing after create ran
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_import_check_is_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "numpy\n").unwrap();
        let exec = Arc::new(ScriptedExecutor::new().rule(
            ScriptRule::on("import pytest")
                .exit_code(1)
                .stderr("ModuleNotFoundError: No module named 'pytest_cov'"),
        ));
        let runner = runner(exec, dir.path());
        let env = runner.provision_environment(&descriptor(), 0).await.unwrap();
        let err = runner
            .install_dependencies(
                &env,
                Path::new("requirements.txt"),
                &["pytest".to_string(), "pytest-cov".to_string()],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyResolution { .. }));
        assert!(err.to_string().contains("pytest_cov"));
    }

    #[tokio::test]
    async fn test_extra_tools_verified_by_distribution_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "numpy\n").unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        let runner = runner(exec.clone(), dir.path());
        let env = runner.provision_environment(&descriptor(), 0).await.unwrap();
        let tools: Vec<String> = ["pytest", "pytest-cov", "pytest-xdist>=2", "pyyaml"]
            .iter()
            .map(|t| t.to_string())
            .collect();

        let prepared = runner
            .install_dependencies(&env, Path::new("requirements.txt"), &tools, 0)
            .await
            .unwrap();
        assert_eq!(prepared.extra_tools(), tools.as_slice());

        let lines = exec.command_lines();
        assert!(lines
            .iter()
            .any(|l| l.contains("importlib.metadata") && l.ends_with("pytest pytest-cov pytest-xdist pyyaml")));
        assert!(lines.iter().any(|l| l.ends_with("python -c import pytest, pytest_cov")));
        assert!(!lines.iter().any(|l| l.contains("import pytest_xdist") || l.contains("import pyyaml")));
    }

    #[tokio::test]
    async fn test_missing_extra_tool_is_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "numpy\n").unwrap();
        let exec = Arc::new(ScriptedExecutor::new().rule(
            ScriptRule::on("importlib.metadata")
                .exit_code(1)
                .stderr("importlib.metadata.PackageNotFoundError: pytest-xdist"),
        ));
        let runner = runner(exec.clone(), dir.path());
        let env = runner.provision_environment(&descriptor(), 0).await.unwrap();
        let err = runner
            .install_dependencies(
                &env,
                Path::new("requirements.txt"),
                &["pytest-xdist".to_string()],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyResolution { .. }));
        assert!(err.to_string().contains("pytest-xdist"));
        assert!(exec.position("import pytest, pytest_cov").is_none());
    }

    #[tokio::test]
    async fn test_pytest_gets_environment_scoped_coverage_files() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new().rule(
            ScriptRule::on("pytest -v")
                .stdout("==== 1 passed in 1.0s ====")
                .writes("coverage-testenv-py37.xml", r#"<coverage line-rate="0.9"></coverage>"#),
        ));
        let runner = runner(exec.clone(), dir.path());
        let env = prepared(&runner, dir.path()).await;

        let reports = runner
            .run_tests(&env, &invocation(vec![ReportFormat::Xml]))
            .await
            .unwrap();
        assert_eq!(
            reports[0].path.as_deref(),
            Some(dir.path().join("coverage-testenv-py37.xml").as_path())
        );

        let pytest = exec
            .calls()
            .into_iter()
            .find(|c| c.display().contains("pytest -v"))
            .unwrap();
        let data_file = dir.path().join(".coverage.testenv-py37");
        assert_eq!(
            pytest.env_var("COVERAGE_FILE"),
            Some(data_file.display().to_string().as_str())
        );
        assert!(pytest
            .argv
            .contains(&"--cov-report=xml:coverage-testenv-py37.xml".to_string()));
        assert!(!dir.path().join("coverage.xml").exists());
    }

    #[tokio::test]
    async fn test_passing_run_produces_one_report_per_format() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(
            ScriptedExecutor::new().rule(
                ScriptRule::on("pytest -v")
                    .stdout("TOTAL     122     18    85%\n==== 1 passed in 1.0s ====")
                    .writes(xml_report_file("testenv-py37"), r#"<coverage line-rate="0.85"></coverage>"#),
            ),
        );
        let runner = runner(exec, dir.path());
        let env = prepared(&runner, dir.path()).await;

        let reports = runner
            .run_tests(&env, &invocation(vec![ReportFormat::Xml, ReportFormat::Term]))
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].format, ReportFormat::Xml);
        assert_eq!(reports[0].total_percent, Some(85.0));
        assert_eq!(reports[1].format, ReportFormat::Term);
        assert_eq!(reports[1].total_percent, Some(85.0));
    }

    #[tokio::test]
    async fn test_failing_tests_remove_xml() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(
            ScriptedExecutor::new().rule(
                ScriptRule::on("pytest -v")
                    .exit_code(1)
                    .stdout("==== 1 failed, 2 passed in 1.0s ====")
                    .writes(xml_report_file("testenv-py37"), r#"<coverage line-rate="0.5"></coverage>"#),
            ),
        );
        let runner = runner(exec, dir.path());
        let env = prepared(&runner, dir.path()).await;

        let err = runner
            .run_tests(&env, &invocation(vec![ReportFormat::Xml]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TestFailure { exit_code: 1, .. }));
        assert!(err.to_string().contains("1 failed"));
        assert!(!dir.path().join(xml_report_file("testenv-py37")).exists());
    }

    #[tokio::test]
    async fn test_missing_xml_is_coverage_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new().rule(
            ScriptRule::on("pytest -v").stdout("==== 1 passed in 1.0s ===="),
        ));
        let runner = runner(exec, dir.path());
        let env = prepared(&runner, dir.path()).await;

        let err = runner
            .run_tests(&env, &invocation(vec![ReportFormat::Xml]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CoverageTool { .. }));
    }

    #[tokio::test]
    async fn test_stale_xml_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(xml_report_file("testenv-py37")),
            r#"<coverage line-rate="1.0"></coverage>"#,
        )
        .unwrap();
        let exec = Arc::new(ScriptedExecutor::new().rule(
            ScriptRule::on("pytest -v").stdout("==== 1 passed in 1.0s ===="),
        ));
        let runner = runner(exec, dir.path());
        let env = prepared(&runner, dir.path()).await;

        let err = runner
            .run_tests(&env, &invocation(vec![ReportFormat::Xml]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CoverageTool { .. }));
    }

    #[tokio::test]
    async fn test_coverage_plugin_failure_is_coverage_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new().rule(
            ScriptRule::on("pytest -v")
                .exit_code(1)
                .stdout("INTERNALERROR> coverage.exceptions.CoverageException: No data\n==== 3 passed in 1.0s ===="),
        ));
        let runner = runner(exec, dir.path());
        let env = prepared(&runner, dir.path()).await;

        let err = runner
            .run_tests(&env, &invocation(vec![ReportFormat::Term]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CoverageTool { .. }));
    }

    #[tokio::test]
    async fn test_teardown_respects_keep_environment() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        let runner = PipelineRunner::new(
            exec.clone(),
            RunnerConfig::new(CondaCli::new(CondaFrontend::Conda), dir.path())
                .keep_environment(true),
        );
        runner.teardown("testenv-py37").await.unwrap();
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(
            ScriptedExecutor::new().rule(ScriptRule::on(" remove ").exit_code(1)),
        );
        let runner = runner(exec, dir.path());
        assert!(runner.teardown("testenv-py37").await.is_err());
    }
}
