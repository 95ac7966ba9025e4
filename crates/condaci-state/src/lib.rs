//! condaci-state: run ledger persistence for condaci
//!
//! Records every pipeline run (one per matrix entry) and its ordered step
//! events so runs can be listed, inspected and gated after the fact.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: Ordered events and immutable terminal runs.
//!
//! ## Key Components
//!
//! - `RunLedger`: async persistence contract
//! - `FsRunLedger`: JSON documents on disk
//! - `MemoryRunLedger`: in-memory fake for tests

mod error;
pub mod fakes;
pub mod fs_ledger;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_ledger::FsRunLedger;
pub use storage_traits::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus, RunSummary,
    StorageResult,
};
