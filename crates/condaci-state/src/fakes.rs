//! In-memory run ledger for tests.
//!
//! `MemoryRunLedger` follows the same rules as `FsRunLedger` (ordered events,
//! immutable terminal runs) without touching disk.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct MemoryRun {
    /// Creation order; breaks `created_at` ties in listings.
    ordinal: usize,
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// Run ledger kept in a `HashMap` behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<RunId, MemoryRun>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs created so far, in any status.
    pub fn len(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_run<T>(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&mut MemoryRun) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(run_id).ok_or_else(|| StorageError::RunNotFound {
            run_id: run_id.0.clone(),
        })?;
        f(run)
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(
        &self,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let mut runs = self.runs.lock().unwrap();
        let ordinal = runs.len();
        runs.insert(
            run_id.clone(),
            MemoryRun {
                ordinal,
                record: RunRecord::running(run_id.clone(), spec_digest.clone(), metadata),
                events: Vec::new(),
            },
        );
        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        self.with_run(run_id, |run| {
            run.record.ensure_running()?;
            run.events.push(event);
            Ok(())
        })
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |run| run.record.finish(RunStatus::Completed, summary))
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |run| run.record.finish(RunStatus::Failed, summary))
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.with_run(run_id, |run| Ok(run.record.clone()))
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        self.with_run(run_id, |run| {
            let mut events = run.events.clone();
            events.sort_by_key(|e| e.seq);
            Ok(events)
        })
    }

    async fn list_runs(
        &self,
        spec_digest: Option<&ContentDigest>,
    ) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut matching: Vec<&MemoryRun> = runs
            .values()
            .filter(|run| spec_digest.map_or(true, |d| &run.record.spec_digest == d))
            .collect();
        matching.sort_by_key(|run| (run.record.created_at, run.ordinal));
        Ok(matching.into_iter().map(|run| run.record.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RunMetadata {
        RunMetadata {
            git_sha: None,
            pipeline_name: "rtlive".to_string(),
            trigger: "push".to_string(),
            interpreter_version: "3.7".to_string(),
            tags: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_listing_keeps_creation_order() {
        let ledger = MemoryRunLedger::new();
        let digest = ContentDigest::from_bytes(b"plan");
        let first = ledger.create_run(&digest, metadata()).await.unwrap();
        let second = ledger.create_run(&digest, metadata()).await.unwrap();

        let runs = ledger.list_runs(None).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(runs[0].run_id, first);
        assert_eq!(runs[1].run_id, second);
    }
}
