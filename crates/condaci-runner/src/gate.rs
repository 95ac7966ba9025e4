//! Gate evaluation over a recorded run.

use std::collections::HashSet;

use condaci_core::StepKind;
use condaci_state::RunEvent;
use serde::{Deserialize, Serialize};

use crate::recorder::kinds;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// CI gate evaluation rules.
pub struct CiGate;

/// Position of a step name in the pipeline order; unknown names sort last.
fn order_of(step: &str) -> usize {
    StepKind::ORDER
        .iter()
        .position(|k| k.name() == step)
        .unwrap_or(StepKind::ORDER.len())
}

impl CiGate {
    /// Evaluate a recorded run.
    ///
    /// Gate rule:
    /// - Each `step_started` must be followed by a `step_finished` with
    ///   exit_code == 0
    /// - No `step_failed` event may appear
    /// - Steps start in pipeline order, and none starts after a failure
    /// - `step_skipped` and `teardown_failed` events are neutral
    pub fn evaluate(events: &[RunEvent]) -> GateVerdict {
        let mut violations = Vec::new();
        let mut started: Vec<String> = Vec::new();
        let mut settled = HashSet::new();
        let mut first_failure: Option<String> = None;

        for event in events {
            let step = event.payload["step"].as_str().unwrap_or("unknown").to_string();
            match event.kind.as_str() {
                kinds::STEP_STARTED => {
                    if let Some(failed) = &first_failure {
                        violations.push(format!("Step '{}' ran after '{}' failed", step, failed));
                    }
                    if let Some(previous) = started.last() {
                        if order_of(previous) >= order_of(&step) {
                            violations.push(format!(
                                "Step '{}' started out of order after '{}'",
                                step, previous
                            ));
                        }
                    }
                    started.push(step);
                }
                kinds::STEP_FINISHED => {
                    let exit_code = event.payload["exit_code"].as_i64().unwrap_or(-1);
                    if exit_code != 0 {
                        violations.push(format!(
                            "Step '{}' finished with non-zero exit code: {}",
                            step, exit_code
                        ));
                        first_failure.get_or_insert_with(|| step.clone());
                    }
                    settled.insert(step);
                }
                kinds::STEP_FAILED => {
                    let kind = event.payload["error_kind"].as_str().unwrap_or("unknown");
                    let error = event.payload["error"].as_str().unwrap_or("Unknown error");
                    violations.push(format!("Step '{}' failed ({}): {}", step, kind, error));
                    first_failure.get_or_insert_with(|| step.clone());
                    settled.insert(step);
                }
                _ => {}
            }
        }

        violations.extend(
            started
                .iter()
                .filter(|step| !settled.contains(*step))
                .map(|step| format!("Step '{}' was started but never completed", step)),
        );

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} started step(s) passed", started.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
