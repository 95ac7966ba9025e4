//! condaci - reproducible conda test pipelines
//!
//! The `condaci` command runs a workflow's interpreter matrix in fresh conda
//! environments and records every run in a ledger on disk.
//!
//! ## Commands
//!
//! - `run`: Provision, install, test and report coverage for each matrix entry
//! - `plan`: Show the resolved steps of each matrix entry without running them
//! - `validate`: Check a workflow file
//! - `history`: List recorded runs
//! - `show`: Show the events of one run and its gate verdict
//! - `env-hash`: Show the environment hash and run digest of each entry

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use conda_env_manager::{CondaCli, InterpreterVersion};
use condaci_core::obs;
use condaci_core::{PipelinePlan, StepStatus, TriggerEvent, Workflow, DEFAULT_WORKFLOW_FILE};
use condaci_runner::{
    workspace_git_sha, CiGate, MatrixResult, MatrixRunner, PipelineResult, PipelineRunner,
    ProcessExecutor, RunIdentity, RunnerConfig,
};
use condaci_state::{ContentDigest, FsRunLedger, RunId, RunLedger, RunStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

/// Ledger location used when neither `--ledger-dir` nor `CONDACI_LEDGER_DIR` is set.
const DEFAULT_LEDGER_DIR: &str = ".condaci/runs";

#[derive(Parser)]
#[command(name = "condaci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reproducible conda test pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow's matrix and record each entry
    Run {
        /// Workflow file (default: <workspace>/condaci.toml)
        #[arg(short = 'f', long, env = "CONDACI_WORKFLOW")]
        workflow: Option<PathBuf>,

        /// Checked-out source tree
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Event that triggered this run
        #[arg(short, long, default_value = "push", env = "CONDACI_EVENT")]
        event: TriggerEvent,

        /// Only run these matrix entries (repeatable)
        #[arg(long = "python")]
        python: Vec<String>,

        /// conda, mamba or micromamba executable (detected if omitted)
        #[arg(long, env = "CONDACI_CONDA")]
        conda: Option<String>,

        /// Leave environments in place after the run
        #[arg(long)]
        keep_env: bool,

        /// Run ledger directory
        #[arg(long, env = "CONDACI_LEDGER_DIR", default_value = DEFAULT_LEDGER_DIR)]
        ledger_dir: PathBuf,

        /// Maximum matrix entries running at once (default: all)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Output format for the result
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show the resolved plan of each matrix entry
    Plan {
        /// Workflow file
        #[arg(short = 'f', long, env = "CONDACI_WORKFLOW", default_value = DEFAULT_WORKFLOW_FILE)]
        workflow: PathBuf,

        /// Only plan these matrix entries (repeatable)
        #[arg(long = "python")]
        python: Vec<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Validate a workflow file
    Validate {
        /// Workflow file
        #[arg(short = 'f', long, env = "CONDACI_WORKFLOW", default_value = DEFAULT_WORKFLOW_FILE)]
        workflow: PathBuf,
    },

    /// List recorded runs, newest first
    History {
        /// Run ledger directory
        #[arg(long, env = "CONDACI_LEDGER_DIR", default_value = DEFAULT_LEDGER_DIR)]
        ledger_dir: PathBuf,

        /// Only runs filed under this digest
        #[arg(long)]
        digest: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show the events of a run and evaluate the gate
    Show {
        /// Run ID
        run_id: String,

        /// Run ledger directory
        #[arg(long, env = "CONDACI_LEDGER_DIR", default_value = DEFAULT_LEDGER_DIR)]
        ledger_dir: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show the environment hash and run digest of each matrix entry
    EnvHash {
        /// Workflow file (default: <workspace>/condaci.toml)
        #[arg(short = 'f', long, env = "CONDACI_WORKFLOW")]
        workflow: Option<PathBuf>,

        /// Checked-out source tree
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    condaci_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            workflow,
            workspace,
            event,
            python,
            conda,
            keep_env,
            ledger_dir,
            max_parallel,
            output,
        } => {
            let workflow = workflow.unwrap_or_else(|| workspace.join(DEFAULT_WORKFLOW_FILE));
            cmd_run(RunOptions {
                workflow,
                workspace,
                event,
                python,
                conda,
                keep_env,
                ledger_dir,
                max_parallel,
                output,
            })
            .await
        }
        Commands::Plan {
            workflow,
            python,
            output,
        } => cmd_plan(&workflow, &python, output),
        Commands::Validate { workflow } => cmd_validate(&workflow),
        Commands::History {
            ledger_dir,
            digest,
            limit,
            output,
        } => cmd_history(&ledger_dir, digest, limit, output).await,
        Commands::Show {
            run_id,
            ledger_dir,
            output,
        } => cmd_show(&ledger_dir, &run_id, output).await,
        Commands::EnvHash {
            workflow,
            workspace,
        } => {
            let workflow = workflow.unwrap_or_else(|| workspace.join(DEFAULT_WORKFLOW_FILE));
            cmd_env_hash(&workflow, &workspace)
        }
    }
}

struct RunOptions {
    workflow: PathBuf,
    workspace: PathBuf,
    event: TriggerEvent,
    python: Vec<String>,
    conda: Option<String>,
    keep_env: bool,
    ledger_dir: PathBuf,
    max_parallel: Option<usize>,
    output: OutputFormat,
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let workflow = Workflow::load(path)
        .with_context(|| format!("Failed to load workflow {}", path.display()))?;
    for warning in workflow.warnings() {
        warn!("{}", warning);
    }
    Ok(workflow)
}

/// Plans for the requested entries, or the whole matrix when none are named.
fn select_plans(workflow: &Workflow, requested: &[String]) -> Result<Vec<PipelinePlan>> {
    if requested.is_empty() {
        return Ok(workflow.plan_all()?);
    }
    let matrix = workflow.matrix_versions()?;
    requested
        .iter()
        .map(|v| -> Result<PipelinePlan> {
            let version: InterpreterVersion = v.parse()?;
            if !matrix.contains(&version) {
                anyhow::bail!(
                    "python {} is not in the workflow matrix ({})",
                    version,
                    workflow.matrix.python_version.join(", ")
                );
            }
            Ok(workflow.plan(&version)?)
        })
        .collect()
}

async fn open_ledger(dir: &Path) -> Result<Arc<dyn RunLedger>> {
    let ledger = FsRunLedger::open(dir)
        .await
        .with_context(|| format!("Failed to open run ledger at {}", dir.display()))?;
    Ok(Arc::new(ledger))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ========== Run ==========

async fn cmd_run(opts: RunOptions) -> Result<()> {
    let workflow = load_workflow(&opts.workflow)?;

    if !workflow.is_triggered_by(opts.event) {
        info!(
            event = %opts.event,
            pipeline = %workflow.name,
            "Workflow is not triggered by this event; nothing to run"
        );
        return Ok(());
    }

    let plans = select_plans(&workflow, &opts.python)?;
    let conda = match &opts.conda {
        Some(executable) => CondaCli::from_executable(executable)?,
        None => CondaCli::detect().context("No conda front-end found on PATH")?,
    };
    let workspace = std::fs::canonicalize(&opts.workspace)
        .with_context(|| format!("Workspace {} does not exist", opts.workspace.display()))?;

    let config = RunnerConfig::new(conda, workspace).keep_environment(opts.keep_env);
    let runner = Arc::new(PipelineRunner::new(Arc::new(ProcessExecutor), config));
    let ledger = open_ledger(&opts.ledger_dir).await?;

    let mut matrix = MatrixRunner::new(ledger.clone(), runner);
    if let Some(n) = opts.max_parallel {
        matrix = matrix.with_max_parallel(n);
    }
    let result = matrix
        .run(&plans, opts.event)
        .await
        .context("Pipeline failed to run")?;

    // A failed entry already names its step; the gate only adds news for entries
    // that reported success
    let mut gate_violations = Vec::new();
    for entry in &result.entries {
        let events = ledger.get_events(&RunId(entry.run_id.clone())).await?;
        let verdict = CiGate::evaluate(&events);
        obs::emit_gate_evaluated(&entry.run_id, verdict.violations.len(), verdict.passed);
        if entry.success && !verdict.passed {
            gate_violations.extend(
                verdict
                    .violations
                    .iter()
                    .map(|v| format!("python {} gate: {}", entry.interpreter_version, v)),
            );
        }
    }

    match opts.output {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_matrix(&result),
    }

    if result.success() && gate_violations.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("CI checks failed ({})", failure_summary(&result, &gate_violations))
    }
}

/// Failed entries with their failing step, then gate violations.
fn failure_summary(result: &MatrixResult, gate_violations: &[String]) -> String {
    result
        .failed()
        .map(|e| {
            format!(
                "python {}: {}",
                e.interpreter_version,
                e.failed_step().unwrap_or("unknown step")
            )
        })
        .chain(gate_violations.iter().cloned())
        .collect::<Vec<_>>()
        .join("; ")
}

fn print_matrix(result: &MatrixResult) {
    for entry in &result.entries {
        print_entry(entry);
        println!();
    }
    let passed = result.entries.iter().filter(|e| e.success).count();
    println!(
        "Summary: {}/{} matrix entries passed",
        passed,
        result.entries.len()
    );
}

fn print_entry(entry: &PipelineResult) {
    println!(
        "{} [python {}] {}",
        entry.pipeline,
        entry.interpreter_version,
        if entry.success { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("  Run ID: {}", entry.run_id);
    println!("  Duration: {}ms", entry.duration_ms);

    for step in &entry.steps {
        let mark = match step.status {
            StepStatus::Passed => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Skipped => "-",
        };
        match &step.detail {
            Some(detail) => println!("    {} {} ({}ms): {}", mark, step.step, step.duration_ms, detail),
            None => println!("    {} {} ({}ms)", mark, step.step, step.duration_ms),
        }
    }

    for report in &entry.reports {
        let total = report
            .total_percent
            .map(|p| format!("{:.2}%", p))
            .unwrap_or_else(|| "n/a".to_string());
        match &report.path {
            Some(path) => println!("  Coverage ({}): {} -> {}", report.format, total, path.display()),
            None => println!("  Coverage ({}): {}", report.format, total),
        }
    }

    if let Some(failure) = &entry.failure {
        println!("  Error [{}]: {}", failure.kind().as_str(), failure);
    }
}

// ========== Plan / Validate ==========

fn cmd_plan(path: &Path, python: &[String], output: OutputFormat) -> Result<()> {
    let workflow = load_workflow(path)?;
    let plans = select_plans(&workflow, python)?;

    if output == OutputFormat::Json {
        return print_json(&plans);
    }

    for plan in &plans {
        println!(
            "{} [python {}] env {} from {} (channel priority: {})",
            plan.pipeline,
            plan.interpreter_version(),
            plan.environment.name,
            plan.environment.channel,
            plan.environment.channel_priority.as_str()
        );
        for step in &plan.steps {
            let formats: Vec<String> = step.report_formats.iter().map(|f| f.to_string()).collect();
            let formats = if formats.is_empty() {
                String::new()
            } else {
                format!(" [{}]", formats.join(", "))
            };
            match &step.skip_reason {
                Some(reason) if !step.enabled => {
                    println!("    - {}{} (skipped: {})", step.kind, formats, reason)
                }
                _ => println!("    ✓ {}{}", step.kind, formats),
            }
        }
        println!("  Plan digest: {}", plan.digest()?);
        println!();
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let workflow = Workflow::load(path)
        .with_context(|| format!("Invalid workflow {}", path.display()))?;
    let warnings = workflow.warnings();

    println!("✓ {} is valid", path.display());
    println!("  Pipeline: {}", workflow.name);
    println!(
        "  Triggers: {}",
        workflow
            .on
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Matrix: {}", workflow.matrix.python_version.join(", "));
    for warning in &warnings {
        println!("  ! {}", warning);
    }
    Ok(())
}

// ========== Ledger ==========

async fn cmd_history(
    ledger_dir: &Path,
    digest: Option<String>,
    limit: usize,
    output: OutputFormat,
) -> Result<()> {
    let ledger = open_ledger(ledger_dir).await?;
    let digest = digest.map(ContentDigest::try_from).transpose()?;
    let mut runs = ledger.list_runs(digest.as_ref()).await?;
    runs.reverse();
    runs.truncate(limit);

    if output == OutputFormat::Json {
        return print_json(&runs);
    }

    if runs.is_empty() {
        println!("No runs recorded in {}", ledger_dir.display());
        return Ok(());
    }
    for run in &runs {
        let status = match run.status {
            RunStatus::Running => "… RUNNING",
            RunStatus::Completed => "✓ PASSED",
            RunStatus::Failed => "✗ FAILED",
        };
        let failed_step = run
            .summary
            .as_ref()
            .and_then(|s| s.failed_step.as_deref())
            .map(|s| format!(" at {}", s))
            .unwrap_or_default();
        println!(
            "{}  {} [python {}] {}{}  {} ({})",
            run.run_id,
            run.metadata.pipeline_name,
            run.metadata.interpreter_version,
            status,
            failed_step,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.spec_digest.short()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ShowOutput {
    run: condaci_state::RunRecord,
    events: Vec<condaci_state::RunEvent>,
    gate: condaci_runner::GateVerdict,
}

async fn cmd_show(ledger_dir: &Path, run_id: &str, output: OutputFormat) -> Result<()> {
    let ledger = open_ledger(ledger_dir).await?;
    let id = RunId(run_id.to_string());
    let run = ledger.get_run(&id).await?;
    let events = ledger.get_events(&id).await?;
    let gate = CiGate::evaluate(&events);
    obs::emit_gate_evaluated(run_id, gate.violations.len(), gate.passed);

    if output == OutputFormat::Json {
        return print_json(&ShowOutput { run, events, gate });
    }

    println!("Run ID: {}", run.run_id);
    println!(
        "Pipeline: {} [python {}]",
        run.metadata.pipeline_name, run.metadata.interpreter_version
    );
    println!("Trigger: {}", run.metadata.trigger);
    if let Some(sha) = &run.metadata.git_sha {
        println!("Git SHA: {}", sha);
    }
    println!("Status: {:?}", run.status);
    println!();

    for event in &events {
        println!("  {:>3} {:<15} {}", event.seq, event.kind, event.payload);
    }

    println!();
    println!("Gate: {}", if gate.passed { "✓ PASSED" } else { "✗ FAILED" });
    for violation in &gate.violations {
        println!("  - {}", violation);
    }
    Ok(())
}

// ========== Environment ==========

fn cmd_env_hash(workflow_path: &Path, workspace: &Path) -> Result<()> {
    let workflow = load_workflow(workflow_path)?;
    let git_sha = workspace_git_sha(workspace);

    for plan in workflow.plan_all()? {
        let identity = RunIdentity::resolve(&plan, workspace, &git_sha)?;
        println!("{} [python {}]", identity.env_name, identity.interpreter_version);
        println!("  Environment Hash: {}", identity.env_hash);
        println!("  Plan Digest: {}", identity.plan_digest);
        println!("  Run Digest: {}", identity.spec_digest()?);
    }
    println!("Git SHA: {}", git_sha);
    Ok(())
}
