//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `run_span`
//! - Emission functions for key lifecycle events: run start, step transitions,
//!   run finish, gate evaluation and teardown problems
//!
//! Every event carries an `event` field (`run.started`, `step.finished`, ...)
//! so JSON logs can be filtered on it.

use tracing::{info, warn};

/// Span tagged with the run id and interpreter version.
///
/// Matrix entries run concurrently on one task, so the span is attached with
/// `tracing::Instrument` rather than entered:
///
/// ```ignore
/// drive_run().instrument(run_span("run-12345", "3.7")).await
/// ```
pub fn run_span(run_id: &str, interpreter_version: &str) -> tracing::Span {
    tracing::info_span!(
        "condaci.run",
        run_id = %run_id,
        python = %interpreter_version
    )
}

/// Emit event: run started for a pipeline and interpreter version.
pub fn emit_run_started(run_id: &str, pipeline: &str, interpreter_version: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        pipeline = %pipeline,
        python = %interpreter_version,
    );
}

pub fn emit_step_started(run_id: &str, step: &str) {
    info!(event = "step.started", run_id = %run_id, step = %step);
}

pub fn emit_step_finished(run_id: &str, step: &str, duration_ms: u64, passed: bool) {
    info!(
        event = "step.finished",
        run_id = %run_id,
        step = %step,
        duration_ms = duration_ms,
        passed = passed,
    );
}

/// Emit event: a conditional step was not selected for this run.
pub fn emit_step_skipped(run_id: &str, step: &str, reason: &str) {
    info!(event = "step.skipped", run_id = %run_id, step = %step, reason = %reason);
}

/// Emit event: run finished with duration, total events, and success status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, total_events: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total_events = total_events,
        success = success,
    );
}

/// Emit event: gate evaluation completed.
pub fn emit_gate_evaluated(run_id: &str, violations: usize, passed: bool) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        violations = violations,
        passed = passed,
    );
}

/// Emit event: environment removal failed (warning level).
pub fn emit_teardown_failed(run_id: &str, env_name: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "env.teardown_failed",
        run_id = %run_id,
        env = %env_name,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _entered = run_span("test-run-id", "3.7").entered();
        emit_step_skipped("test-run-id", "strict-report", "python 3.8 != 3.7");
    }
}
