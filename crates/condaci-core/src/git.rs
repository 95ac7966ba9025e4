//! Git integration for recording which revision a run tested.

use std::fmt;
use std::path::Path;
use std::process::Command;

/// Failure to read repository state.
#[derive(Debug, thiserror::Error)]
#[error("git error: {0}")]
pub struct GitError(pub String);

/// The checked-out revision of a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// HEAD commit SHA.
    pub sha: String,
    /// Tracked files differ from HEAD.
    pub dirty: bool,
}

impl fmt::Display for Revision {
    /// `<sha>`, or `<sha>+dirty` for a modified tree.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dirty {
            write!(f, "{}+dirty", self.sha)
        } else {
            f.write_str(&self.sha)
        }
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| GitError(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        return Err(GitError(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Read HEAD and the dirty flag of the repository containing `dir`.
///
/// Untracked files do not make a tree dirty; a run only sees what the
/// requirements and test target reference, and coverage reports are
/// usually untracked.
pub fn read_revision(dir: &Path) -> Result<Revision, GitError> {
    let sha = git(dir, &["rev-parse", "HEAD"])?;
    if sha.is_empty() {
        return Err(GitError("git rev-parse HEAD returned empty output".to_string()));
    }
    let status = git(dir, &["status", "--porcelain", "--untracked-files=no"])?;
    Ok(Revision {
        sha,
        dirty: !status.is_empty(),
    })
}
