//! Command execution.
//!
//! Every external program the pipeline starts goes through a
//! [`CommandExecutor`]. [`ProcessExecutor`] spawns real processes; the
//! scripted fake in `fakes` replays canned results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// A command line plus where and how long to run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Working directory, or the current one.
    pub cwd: Option<PathBuf>,
    /// Variables set on top of the inherited environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// 0 = unlimited.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            cwd: None,
            env: BTreeMap::new(),
            timeout_secs: 0,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Space-joined command line for logs and event payloads.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Last few non-empty lines of output, for error messages.
    pub fn excerpt(&self, max_lines: usize) -> String {
        let combined = self.combined();
        let lines: Vec<&str> = combined.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Failure to obtain a [`CommandOutput`] at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs} seconds")]
    TimedOut { program: String, secs: u64 },

    #[error("{program} exited with code {exit_code}: {detail}")]
    Failed {
        program: String,
        exit_code: i32,
        detail: String,
    },

    #[error("IO error while waiting for {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs commands for the pipeline.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;
}

/// Executor that spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();

        let (exe, args) = spec.argv.split_first().ok_or(ExecError::EmptyCommand)?;

        let mut command = Command::new(exe);
        command
            .args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        debug!(command = %spec.display(), "Spawning command");
        let child = command.spawn().map_err(|source| ExecError::Spawn {
            program: exe.clone(),
            source,
        })?;

        let waited = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ExecError::TimedOut {
                program: exe.clone(),
                secs: spec.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|source| ExecError::Io {
            program: exe.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
