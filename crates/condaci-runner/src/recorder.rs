//! Run recorder: bridges pipeline step events to `RunLedger` persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use condaci_core::obs;
use condaci_state::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunSummary, StorageResult,
};

/// Event kinds written by the pipeline.
pub mod kinds {
    pub const STEP_STARTED: &str = "step_started";
    pub const STEP_FINISHED: &str = "step_finished";
    pub const STEP_FAILED: &str = "step_failed";
    pub const STEP_SKIPPED: &str = "step_skipped";
    pub const TEARDOWN_FAILED: &str = "teardown_failed";
}

/// Records the events of one run into a [`RunLedger`].
///
/// Usage:
/// 1. Call [`RunRecorder::start`] to create a new run.
/// 2. Call [`RunRecorder::record`] for each step event; sequence numbers are
///    assigned in call order starting at 1.
/// 3. Call [`RunRecorder::finish_ok`] or [`RunRecorder::finish_err`] to finalize.
pub struct RunRecorder {
    ledger: Arc<dyn RunLedger>,
    run_id: RunId,
    next_seq: AtomicU64,
}

impl RunRecorder {
    /// Start a new run in the ledger, returning a recorder bound to that run.
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<Self> {
        let run_id = ledger.create_run(spec_digest, metadata.clone()).await?;
        obs::emit_run_started(
            &run_id.to_string(),
            &metadata.pipeline_name,
            &metadata.interpreter_version,
        );
        Ok(Self {
            ledger,
            run_id,
            next_seq: AtomicU64::new(1),
        })
    }

    /// Append one event to the run.
    pub async fn record(&self, kind: &str, payload: serde_json::Value) -> StorageResult<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = RunEvent {
            seq,
            kind: kind.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        self.ledger.append_event(&self.run_id, event).await
    }

    /// Number of events recorded so far.
    pub fn events_recorded(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    /// Finalize the run as completed.
    pub async fn finish_ok(self, summary: RunSummary) -> StorageResult<()> {
        obs::emit_run_finished(
            &self.run_id.to_string(),
            summary.duration_ms,
            summary.total_events,
            true,
        );
        self.ledger.complete_run(&self.run_id, summary).await
    }

    /// Finalize the run as failed.
    pub async fn finish_err(self, summary: RunSummary) -> StorageResult<()> {
        obs::emit_run_finished(
            &self.run_id.to_string(),
            summary.duration_ms,
            summary.total_events,
            false,
        );
        self.ledger.fail_run(&self.run_id, summary).await
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use condaci_state::fakes::MemoryRunLedger;
    use condaci_state::RunStatus;

    fn metadata() -> RunMetadata {
        RunMetadata {
            git_sha: None,
            pipeline_name: "rtlive".to_string(),
            trigger: "push".to_string(),
            interpreter_version: "3.7".to_string(),
            tags: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_recorder_assigns_sequence_numbers() {
        let ledger = Arc::new(MemoryRunLedger::new());
        let recorder = RunRecorder::start(
            ledger.clone(),
            &ContentDigest::from_bytes(b"plan"),
            metadata(),
        )
        .await
        .unwrap();

        recorder
            .record(kinds::STEP_STARTED, serde_json::json!({"step": "checkout"}))
            .await
            .unwrap();
        recorder
            .record(kinds::STEP_FINISHED, serde_json::json!({"step": "checkout"}))
            .await
            .unwrap();
        assert_eq!(recorder.events_recorded(), 2);

        let run_id = recorder.run_id().clone();
        recorder
            .finish_ok(RunSummary {
                total_events: 2,
                duration_ms: 1,
                success: true,
                failed_step: None,
            })
            .await
            .unwrap();

        let events = ledger.get_events(&run_id).await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(
            ledger.get_run(&run_id).await.unwrap().status,
            RunStatus::Completed
        );
    }
}
