//! Requirement list parsing.
//!
//! The list is consumed, never produced: the file itself is handed to pip,
//! the parsed form feeds environment hashing and plan output.

use crate::error::CondaError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ordered requirement lines from a pip requirements file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementList {
    /// File the list was read from.
    pub source: PathBuf,
    /// Requirement lines, comments and blanks removed, order preserved.
    pub entries: Vec<String>,
}

impl RequirementList {
    /// Read and parse a requirements file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CondaError::RequirementsNotFound(
                path.display().to_string(),
            ));
        }
        let content = std::fs::read_to_string(path)?;
        let entries = parse_requirements(&content)?;
        Ok(Self {
            source: path.to_path_buf(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Package names without version specifiers or markers.
    ///
    /// Option lines (`-r`, `--index-url`, ...) are not packages and are left out.
    pub fn package_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.starts_with('-'))
            .map(|e| package_name(e))
            .collect()
    }
}

/// Parse requirement text into ordered entries.
pub fn parse_requirements(content: &str) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = match raw.find(" #").or_else(|| raw.starts_with('#').then_some(0)) {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('-') && package_name(line).is_empty() {
            return Err(CondaError::InvalidRequirement {
                line: idx + 1,
                reason: format!("no package name in '{}'", line),
            });
        }
        entries.push(line.to_string());
    }
    Ok(entries)
}

fn package_name(entry: &str) -> String {
    entry
        .split(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | ';' | '[' | ' ' | '@'))
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
