//! Run identity.
//!
//! A run is identified by what it tests: the resolved plan, the environment
//! inputs and the source revision. Equal inputs give equal digests, so
//! `condaci history` can group repeated runs of the same thing.

use std::path::Path;

use conda_env_manager::{generate_environment_hash, RequirementList};
use condaci_core::{canonical_json, read_revision, PipelinePlan};
use condaci_state::ContentDigest;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Recorded when the workspace is not a git checkout.
pub const UNKNOWN_GIT_SHA: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunIdentity {
    pub pipeline: String,
    pub interpreter_version: String,
    pub env_name: String,
    /// Digest of the resolved plan.
    pub plan_digest: String,
    /// Hash of channel, interpreter, requirements and tooling.
    pub env_hash: String,
    /// Commit under test, suffixed `+dirty` for a modified tree, or `unknown`.
    pub git_sha: String,
}

impl RunIdentity {
    /// Identity of `plan` run against `workspace` at `git_sha`.
    ///
    /// The requirements file is hashed when it can be read; a missing file is
    /// reported by the install step, not here.
    pub fn resolve(
        plan: &PipelinePlan,
        workspace: &Path,
        git_sha: &str,
    ) -> anyhow::Result<Self> {
        let plan_digest = plan.digest()?;
        let requirements = RequirementList::from_file(&workspace.join(&plan.requirements)).ok();
        let env_hash =
            generate_environment_hash(&plan.environment, requirements.as_ref(), &plan.extra_tools)?;
        debug!(
            env = %plan.environment.name,
            env_hash = %env_hash.short(),
            plan = %&plan_digest[..12],
            "Resolved run identity"
        );

        Ok(Self {
            pipeline: plan.pipeline.clone(),
            interpreter_version: plan.interpreter_version().to_string(),
            env_name: plan.environment.name.clone(),
            plan_digest,
            env_hash: env_hash.hash,
            git_sha: git_sha.to_string(),
        })
    }

    /// Digest the ledger files the run under.
    pub fn spec_digest(&self) -> anyhow::Result<ContentDigest> {
        let canonical = canonical_json(&serde_json::to_value(self)?)?;
        Ok(ContentDigest::from_bytes(canonical.as_bytes()))
    }
}

/// Revision label of the workspace (`<sha>` or `<sha>+dirty`), or
/// [`UNKNOWN_GIT_SHA`].
pub fn workspace_git_sha(workspace: &Path) -> String {
    match read_revision(workspace) {
        Ok(revision) => revision.to_string(),
        Err(e) => {
            debug!(error = %e, "No git revision for workspace");
            UNKNOWN_GIT_SHA.to_string()
        }
    }
}
