//! JSON-file run ledger.
//!
//! One document per run at `<root>/<run_id>.json`, holding the record and
//! its events. Writes go to a temp file first and are renamed into place, so
//! a reader never sees a half-written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Serialize, Deserialize)]
struct RunDocument {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// Run ledger persisted as JSON documents in a directory.
#[derive(Debug)]
pub struct FsRunLedger {
    root: PathBuf,
    // Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FsRunLedger {
    /// Open (and create if needed) a ledger rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Opened run ledger");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, run_id: &RunId) -> StorageResult<PathBuf> {
        let id = run_id.0.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(StorageError::RunNotFound {
                run_id: id.to_string(),
            });
        }
        Ok(self.root.join(format!("{}.json", id)))
    }

    async fn load(&self, run_id: &RunId) -> StorageResult<RunDocument> {
        let path = self.document_path(run_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::RunNotFound {
                    run_id: run_id.0.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn store(&self, doc: &RunDocument) -> StorageResult<()> {
        let path = self.document_path(&doc.record.run_id)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(doc)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn finish(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: RunSummary,
    ) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load(run_id).await?;
        doc.record.finish(status, summary)?;
        self.store(&doc).await
    }
}

#[async_trait]
impl RunLedger for FsRunLedger {
    async fn create_run(
        &self,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let doc = RunDocument {
            record: RunRecord::running(run_id.clone(), spec_digest.clone(), metadata),
            events: Vec::new(),
        };
        let _guard = self.write_lock.lock().await;
        self.store(&doc).await?;
        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load(run_id).await?;
        doc.record.ensure_running()?;
        doc.events.push(event);
        self.store(&doc).await
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Completed, summary).await
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Failed, summary).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        Ok(self.load(run_id).await?.record)
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let mut events = self.load(run_id).await?.events;
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn list_runs(
        &self,
        spec_digest: Option<&ContentDigest>,
    ) -> StorageResult<Vec<RunRecord>> {
        let mut records = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let doc: RunDocument = match serde_json::from_slice(&bytes) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable run document");
                    continue;
                }
            };
            if spec_digest.map(|d| doc.record.spec_digest == *d).unwrap_or(true) {
                records.push(doc.record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
