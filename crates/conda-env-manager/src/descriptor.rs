//! Environment descriptor: the resolved identity of one isolated environment.

use crate::error::CondaError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interpreter version pinned by an environment (`MAJOR.MINOR[.PATCH]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterpreterVersion(String);

impl InterpreterVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Suffix used to keep environments of parallel matrix entries apart,
    /// e.g. `3.7` -> `py37`.
    pub fn env_suffix(&self) -> String {
        format!("py{}", self.0.replace('.', ""))
    }
}

impl FromStr for InterpreterVersion {
    type Err = CondaError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        let well_formed = (2..=3).contains(&parts.len())
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
        if !well_formed {
            return Err(CondaError::InvalidInterpreterVersion(s.to_string()));
        }
        Ok(InterpreterVersion(s.to_string()))
    }
}

impl TryFrom<String> for InterpreterVersion {
    type Error = CondaError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<InterpreterVersion> for String {
    fn from(v: InterpreterVersion) -> Self {
        v.0
    }
}

impl fmt::Display for InterpreterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the solver treats packages that exist in more than one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPriority {
    /// Fail rather than mix packages from lower-priority channels.
    #[default]
    Strict,
    /// Prefer higher-priority channels but allow mixing.
    Flexible,
    /// Ignore channel order entirely.
    Disabled,
}

impl ChannelPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPriority::Strict => "strict",
            ChannelPriority::Flexible => "flexible",
            ChannelPriority::Disabled => "disabled",
        }
    }

    /// Solver flag for `create`, if the policy needs one.
    pub fn solver_flag(&self) -> Option<&'static str> {
        match self {
            ChannelPriority::Strict => Some("--strict-channel-priority"),
            ChannelPriority::Flexible => None,
            ChannelPriority::Disabled => Some("--no-channel-priority"),
        }
    }
}

impl FromStr for ChannelPriority {
    type Err = CondaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ChannelPriority::Strict),
            "flexible" => Ok(ChannelPriority::Flexible),
            "disabled" => Ok(ChannelPriority::Disabled),
            other => Err(CondaError::InvalidChannelPriority(other.to_string())),
        }
    }
}

impl fmt::Display for ChannelPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named configuration of one isolated environment.
///
/// Created at pipeline start and discarded at pipeline end; only its digest
/// outlives the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    /// Environment name passed to `--name`.
    pub name: String,
    /// Pinned interpreter version.
    pub interpreter_version: InterpreterVersion,
    /// Package source channel.
    pub channel: String,
    /// Channel-resolution policy.
    pub channel_priority: ChannelPriority,
}

impl EnvironmentDescriptor {
    /// Create a validated descriptor.
    pub fn new(
        name: impl Into<String>,
        interpreter_version: InterpreterVersion,
        channel: impl Into<String>,
        channel_priority: ChannelPriority,
    ) -> Result<Self> {
        let name = name.into();
        let channel = channel.into();
        if name.trim().is_empty() {
            return Err(CondaError::InvalidDescriptor(
                "environment name cannot be empty".to_string(),
            ));
        }
        if name.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(CondaError::InvalidDescriptor(format!(
                "environment name '{}' must not contain whitespace or '/'",
                name
            )));
        }
        if channel.trim().is_empty() {
            return Err(CondaError::InvalidDescriptor(
                "channel cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            interpreter_version,
            channel,
            channel_priority,
        })
    }

    /// Interpreter package spec for the solver, e.g. `python=3.7`.
    pub fn interpreter_spec(&self) -> String {
        format!("python={}", self.interpreter_version)
    }

    /// Same descriptor under a name unique to its interpreter version.
    pub fn isolated_for_matrix(&self) -> Self {
        let mut isolated = self.clone();
        isolated.name = format!("{}-{}", self.name, self.interpreter_version.env_suffix());
        isolated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> InterpreterVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_interpreter_version_accepts_minor_and_patch() {
        assert_eq!(v("3.7").as_str(), "3.7");
        assert_eq!(v("3.10.4").as_str(), "3.10.4");
        assert_eq!(v(" 3.8 ").as_str(), "3.8");
    }

    #[test]
    fn test_interpreter_version_rejects_malformed() {
        for bad in ["3", "3.", "three.seven", "3.7.1.2", "", "3.x"] {
            assert!(
                bad.parse::<InterpreterVersion>().is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_env_suffix() {
        assert_eq!(v("3.7").env_suffix(), "py37");
        assert_eq!(v("3.10").env_suffix(), "py310");
    }

    #[test]
    fn test_interpreter_version_deserializes_with_validation() {
        let ok: InterpreterVersion = serde_json::from_str("\"3.9\"").unwrap();
        assert_eq!(ok, v("3.9"));
        assert!(serde_json::from_str::<InterpreterVersion>("\"nope\"").is_err());
    }

    #[test]
    fn test_channel_priority_parse_and_flags() {
        assert_eq!("STRICT".parse::<ChannelPriority>().unwrap(), ChannelPriority::Strict);
        assert_eq!(
            ChannelPriority::Strict.solver_flag(),
            Some("--strict-channel-priority")
        );
        assert_eq!(ChannelPriority::Flexible.solver_flag(), None);
        assert_eq!(
            ChannelPriority::Disabled.solver_flag(),
            Some("--no-channel-priority")
        );
        assert!("loose".parse::<ChannelPriority>().is_err());
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(EnvironmentDescriptor::new("", v("3.7"), "conda-forge", ChannelPriority::Strict)
            .is_err());
        assert!(
            EnvironmentDescriptor::new("my env", v("3.7"), "conda-forge", ChannelPriority::Strict)
                .is_err()
        );
        assert!(EnvironmentDescriptor::new("testenv", v("3.7"), " ", ChannelPriority::Strict)
            .is_err());
    }

    #[test]
    fn test_isolated_for_matrix_suffixes_name() {
        let desc =
            EnvironmentDescriptor::new("testenv", v("3.7"), "conda-forge", ChannelPriority::Strict)
                .unwrap();
        let isolated = desc.isolated_for_matrix();
        assert_eq!(isolated.name, "testenv-py37");
        assert_eq!(isolated.interpreter_spec(), "python=3.7");
        assert_eq!(isolated.channel, desc.channel);
    }
}
