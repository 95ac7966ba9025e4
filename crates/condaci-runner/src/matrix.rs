//! Matrix fan-out.
//!
//! Every matrix entry is an independent run with its own environment name,
//! so entries can run concurrently. A semaphore bounds how many do.

use std::sync::Arc;

use condaci_core::{PipelinePlan, TriggerEvent};
use condaci_state::RunLedger;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::info;

use crate::pipeline::{Pipeline, PipelineResult};
use crate::runner::PipelineRunner;
use crate::spec::{workspace_git_sha, RunIdentity};

/// Results of every entry, in matrix order.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixResult {
    pub entries: Vec<PipelineResult>,
}

impl MatrixResult {
    pub fn success(&self) -> bool {
        self.entries.iter().all(|e| e.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineResult> {
        self.entries.iter().filter(|e| !e.success)
    }
}

/// Runs the plans of a matrix concurrently.
pub struct MatrixRunner {
    ledger: Arc<dyn RunLedger>,
    runner: Arc<PipelineRunner>,
    max_parallel: Option<usize>,
}

impl MatrixRunner {
    pub fn new(ledger: Arc<dyn RunLedger>, runner: Arc<PipelineRunner>) -> Self {
        Self {
            ledger,
            runner,
            max_parallel: None,
        }
    }

    /// Cap concurrent entries. Defaults to one slot per entry.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel.max(1));
        self
    }

    pub async fn run(
        &self,
        plans: &[PipelinePlan],
        trigger: TriggerEvent,
    ) -> anyhow::Result<MatrixResult> {
        let workspace = self.runner.config().workspace.clone();
        let git_sha = workspace_git_sha(&workspace);
        let slots = self.max_parallel.unwrap_or(plans.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(slots));
        info!(entries = plans.len(), slots, git_sha = %git_sha, "Running matrix");

        let identities = plans
            .iter()
            .map(|plan| RunIdentity::resolve(plan, &workspace, &git_sha))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let runs = plans.iter().zip(identities.iter()).map(|(plan, identity)| {
            let semaphore = semaphore.clone();
            let ledger = self.ledger.clone();
            let runner = self.runner.clone();
            async move {
                let _permit = semaphore.acquire().await?;
                Pipeline::run(ledger, &runner, plan, identity, trigger).await
            }
        });

        let entries = join_all(runs)
            .await
            .into_iter()
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(MatrixResult { entries })
    }
}
