//! Pipeline orchestration and run recording.

use std::sync::Arc;
use std::time::Instant;

use condaci_core::obs;
use condaci_core::{
    CoverageReport, PipelineError, PipelinePlan, StepKind, StepOutcome, StepStatus, TriggerEvent,
};
use condaci_state::{RunLedger, RunMetadata, RunSummary};
use serde::Serialize;
use serde_json::json;
use tracing::{info, Instrument};

use crate::recorder::{kinds, RunRecorder};
use crate::runner::{PipelineRunner, PreparedEnvironment, ProvisionedEnvironment, TestInvocation};
use crate::spec::RunIdentity;

/// Result of one matrix entry.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// Run ID in the ledger.
    pub run_id: String,

    pub pipeline: String,

    pub interpreter_version: String,

    /// Whether every selected step passed.
    pub success: bool,

    /// Outcomes in execution order; steps after a failure are absent.
    pub steps: Vec<StepOutcome>,

    /// Coverage reports of the run. Empty unless the run succeeded.
    pub reports: Vec<CoverageReport>,

    /// The error that stopped the run.
    pub failure: Option<PipelineError>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Digest the run is filed under.
    pub spec_digest: String,
}

impl PipelineResult {
    pub fn passed_count(&self) -> usize {
        self.count(StepStatus::Passed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    /// Name of the step that stopped the run.
    pub fn failed_step(&self) -> Option<&str> {
        self.failure.as_ref().map(PipelineError::step)
    }

    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// Environments made so far in a run.
#[derive(Default)]
struct RunState {
    provision_attempted: bool,
    provisioned: Option<ProvisionedEnvironment>,
    prepared: Option<PreparedEnvironment>,
}

/// Fail-fast pipeline orchestrator.
pub struct Pipeline;

impl Pipeline {
    /// Execute one resolved plan and record it in the ledger.
    ///
    /// Steps run in plan order. Each executed step records `step_started`
    /// followed by `step_finished` or `step_failed`; unselected steps record
    /// `step_skipped`. The first failure ends the run. The environment is
    /// torn down afterwards whether the run passed or not.
    ///
    /// Returns `Err` only when the ledger cannot be written; step failures
    /// are reported through [`PipelineResult::failure`].
    pub async fn run(
        ledger: Arc<dyn RunLedger>,
        runner: &PipelineRunner,
        plan: &PipelinePlan,
        identity: &RunIdentity,
        trigger: TriggerEvent,
    ) -> anyhow::Result<PipelineResult> {
        let start = Instant::now();
        let spec_digest = identity.spec_digest()?;
        let version = plan.interpreter_version().to_string();

        let metadata = RunMetadata {
            git_sha: Some(identity.git_sha.clone()),
            pipeline_name: plan.pipeline.clone(),
            trigger: trigger.to_string(),
            interpreter_version: version.clone(),
            tags: json!({
                "env": &plan.environment.name,
                "channel": &plan.environment.channel,
                "channel_priority": plan.environment.channel_priority.as_str(),
                "plan_digest": &identity.plan_digest,
                "env_hash": &identity.env_hash,
                "steps": plan.steps.iter().map(|s| s.kind.name()).collect::<Vec<_>>(),
                "workspace": runner.config().workspace.to_string_lossy(),
            }),
        };

        let recorder = RunRecorder::start(ledger, &spec_digest, metadata).await?;
        let span = obs::run_span(&recorder.run_id().to_string(), &version);
        Self::drive(recorder, runner, plan, start, spec_digest.to_string())
            .instrument(span)
            .await
    }

    async fn drive(
        recorder: RunRecorder,
        runner: &PipelineRunner,
        plan: &PipelinePlan,
        start: Instant,
        spec_digest: String,
    ) -> anyhow::Result<PipelineResult> {
        let run_id = recorder.run_id().to_string();
        info!(pipeline = %plan.pipeline, env = %plan.environment.name, "Starting pipeline");

        let mut state = RunState::default();
        let mut outcomes = Vec::new();
        let mut reports = Vec::new();
        let mut failure: Option<PipelineError> = None;

        for step in &plan.steps {
            if failure.is_some() {
                break;
            }
            let name = step.kind.name();

            if !step.enabled {
                let reason = step.skip_reason.clone().unwrap_or_default();
                obs::emit_step_skipped(&run_id, name, &reason);
                recorder
                    .record(kinds::STEP_SKIPPED, json!({ "step": name, "reason": &reason }))
                    .await?;
                outcomes.push(StepOutcome::skipped(step.kind, reason));
                continue;
            }

            obs::emit_step_started(&run_id, name);
            recorder
                .record(
                    kinds::STEP_STARTED,
                    json!({
                        "step": name,
                        "timeout_secs": step.timeout_secs,
                        "report_formats": &step.report_formats,
                    }),
                )
                .await?;

            let step_start = Instant::now();
            let result = execute_step(runner, plan, step.kind, &mut state).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;
            obs::emit_step_finished(&run_id, name, duration_ms, result.is_ok());

            match result {
                Ok(step_reports) => {
                    recorder
                        .record(
                            kinds::STEP_FINISHED,
                            json!({
                                "step": name,
                                "exit_code": 0,
                                "duration_ms": duration_ms,
                                "reports": &step_reports,
                            }),
                        )
                        .await?;
                    reports.extend(step_reports.iter().cloned());
                    outcomes.push(StepOutcome::passed(step.kind, duration_ms).with_reports(step_reports));
                }
                Err(error) => {
                    let exit_code = match &error {
                        PipelineError::TestFailure { exit_code, .. } => *exit_code,
                        _ => -1,
                    };
                    recorder
                        .record(
                            kinds::STEP_FAILED,
                            json!({
                                "step": name,
                                "exit_code": exit_code,
                                "duration_ms": duration_ms,
                                "error_kind": error.kind(),
                                "error": error.to_string(),
                            }),
                        )
                        .await?;
                    outcomes.push(StepOutcome::failed(step.kind, duration_ms, &error));
                    failure = Some(error);
                }
            }
        }

        if state.provision_attempted {
            if let Err(e) = runner.teardown(&plan.environment.name).await {
                obs::emit_teardown_failed(&run_id, &plan.environment.name, &e);
                recorder
                    .record(
                        kinds::TEARDOWN_FAILED,
                        json!({ "env": &plan.environment.name, "error": e.to_string() }),
                    )
                    .await?;
            }
        }

        let success = failure.is_none();
        if !success {
            // Reports of a failed run are not authoritative
            reports.clear();
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let summary = RunSummary {
            total_events: recorder.events_recorded(),
            duration_ms,
            success,
            failed_step: failure.as_ref().map(|f| f.step().to_string()),
        };

        if success {
            recorder.finish_ok(summary).await?;
            info!(run_id = %run_id, "Pipeline completed successfully");
        } else {
            recorder.finish_err(summary).await?;
            info!(run_id = %run_id, "Pipeline failed");
        }

        Ok(PipelineResult {
            run_id,
            pipeline: plan.pipeline.clone(),
            interpreter_version: plan.interpreter_version().to_string(),
            success,
            steps: outcomes,
            reports,
            failure,
            duration_ms,
            spec_digest,
        })
    }
}

async fn execute_step(
    runner: &PipelineRunner,
    plan: &PipelinePlan,
    kind: StepKind,
    state: &mut RunState,
) -> Result<Vec<CoverageReport>, PipelineError> {
    let timeout_secs = plan.step(kind).map(|s| s.timeout_secs).unwrap_or(0);
    match kind {
        StepKind::Checkout => runner.checkout(plan).await.map(|_| Vec::new()),
        StepKind::Provision => {
            state.provision_attempted = true;
            let env = runner
                .provision_environment(&plan.environment, timeout_secs)
                .await?;
            state.provisioned = Some(env);
            Ok(Vec::new())
        }
        StepKind::Install => {
            let env = state
                .provisioned
                .as_ref()
                .ok_or_else(|| PipelineError::DependencyResolution {
                    step: kind.name().to_string(),
                    message: "no provisioned environment to install into".to_string(),
                })?;
            let prepared = runner
                .install_dependencies(env, &plan.requirements, &plan.extra_tools, timeout_secs)
                .await?;
            state.prepared = Some(prepared);
            Ok(Vec::new())
        }
        StepKind::Test | StepKind::StrictReport => {
            let env = state
                .prepared
                .as_ref()
                .ok_or_else(|| PipelineError::TestFailure {
                    step: kind.name().to_string(),
                    exit_code: -1,
                    message: "dependencies were not installed".to_string(),
                })?;
            runner
                .run_tests(env, &TestInvocation::from_plan(plan, kind))
                .await
        }
    }
}
