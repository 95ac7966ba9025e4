//! Environment and source hashing
//!
//! Content-addressable identifiers for a resolved environment and for the
//! source tree under test, so identical inputs are recognisable across runs.

use crate::descriptor::EnvironmentDescriptor;
use crate::requirements::RequirementList;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Environment hash - content-addressable identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvHash {
    /// The SHA256 hash
    pub hash: String,
    /// What went into the hash
    pub source: HashSource,
}

/// Inputs covered by an [`EnvHash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashSource {
    /// Descriptor only (no requirements file)
    Descriptor,
    /// Descriptor plus requirement list and tooling
    Requirements,
}

impl std::fmt::Display for EnvHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl EnvHash {
    pub fn new(hash: String, source: HashSource) -> Self {
        EnvHash { hash, source }
    }

    /// Get short hash (first 12 characters)
    pub fn short(&self) -> &str {
        &self.hash[..12.min(self.hash.len())]
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    channel: &'a str,
    channel_priority: &'a str,
    interpreter_version: &'a str,
    requirements: &'a [String],
    extra_tools: &'a [String],
}

/// Hash what determines an environment's contents.
///
/// The environment name is left out: two matrix entries with different
/// names but identical inputs resolve to the same packages.
pub fn generate_environment_hash(
    descriptor: &EnvironmentDescriptor,
    requirements: Option<&RequirementList>,
    extra_tools: &[String],
) -> Result<EnvHash> {
    let entries: &[String] = requirements.map(|r| r.entries.as_slice()).unwrap_or(&[]);
    let input = HashInput {
        channel: &descriptor.channel,
        channel_priority: descriptor.channel_priority.as_str(),
        interpreter_version: descriptor.interpreter_version.as_str(),
        requirements: entries,
        extra_tools,
    };
    let bytes = serde_json::to_vec(&input)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let hash = hex::encode(hasher.finalize());

    let source = if requirements.is_some() {
        HashSource::Requirements
    } else {
        HashSource::Descriptor
    };
    debug!(hash = &hash[..12], ?source, "Environment hash");
    Ok(EnvHash::new(hash, source))
}

/// Hash the Python sources under `source_path`.
///
/// Files are visited in sorted order so the hash does not depend on
/// directory iteration order.
pub fn generate_source_hash(source_path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    if source_path.is_dir() {
        hash_sources_recursive(source_path, source_path, &mut hasher)?;
    } else if source_path.is_file() {
        hasher.update(std::fs::read(source_path)?);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn hash_sources_recursive(root: &Path, dir: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let name = path.file_name().unwrap_or_default().to_string_lossy();

        // Skip hidden entries and interpreter caches
        if name.starts_with('.') || name == "__pycache__" {
            continue;
        }

        if path.is_dir() {
            hash_sources_recursive(root, &path, hasher)?;
        } else if path.extension().map(|e| e == "py").unwrap_or(false) {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(std::fs::read(&path)?);
            hasher.update(b"\0");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ChannelPriority;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn descriptor(name: &str, version: &str) -> EnvironmentDescriptor {
        EnvironmentDescriptor::new(
            name,
            version.parse().unwrap(),
            "conda-forge",
            ChannelPriority::Strict,
        )
        .unwrap()
    }

    fn requirements(entries: &[&str]) -> RequirementList {
        RequirementList {
            source: PathBuf::from("requirements.txt"),
            entries: entries.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_env_hash_short() {
        let hash = EnvHash::new(
            "abc123def456789012345678901234567890123456789012345678901234".to_string(),
            HashSource::Descriptor,
        );
        assert_eq!(hash.short(), "abc123def456");
    }

    #[test]
    fn test_environment_hash_ignores_name() {
        let tools = vec!["pytest".to_string()];
        let reqs = requirements(&["numpy"]);
        let a = generate_environment_hash(&descriptor("a", "3.7"), Some(&reqs), &tools).unwrap();
        let b = generate_environment_hash(&descriptor("b", "3.7"), Some(&reqs), &tools).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source, HashSource::Requirements);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn test_changing_interpreter_changes_hash() {
        let a = generate_environment_hash(&descriptor("env", "3.7"), None, &[]).unwrap();
        let b = generate_environment_hash(&descriptor("env", "3.8"), None, &[]).unwrap();
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.source, HashSource::Descriptor);
    }

    #[test]
    fn test_requirement_order_is_significant() {
        let d = descriptor("env", "3.7");
        let a = generate_environment_hash(&d, Some(&requirements(&["numpy", "pandas"])), &[])
            .unwrap();
        let b = generate_environment_hash(&d, Some(&requirements(&["pandas", "numpy"])), &[])
            .unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_source_hash_deterministic_and_python_only() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("rtlive")).unwrap();
        std::fs::write(dir.path().join("rtlive/model.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();

        let h1 = generate_source_hash(dir.path()).unwrap();
        std::fs::write(dir.path().join("README.md"), "changed docs").unwrap();
        let h2 = generate_source_hash(dir.path()).unwrap();
        assert_eq!(h1, h2, "non-Python files must not affect the hash");

        std::fs::write(dir.path().join("rtlive/model.py"), "x = 2\n").unwrap();
        let h3 = generate_source_hash(dir.path()).unwrap();
        assert_ne!(h1, h3);
    }
}
