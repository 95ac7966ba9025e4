//! Scripted command executor (testing only)
//!
//! `ScriptedExecutor` answers commands from a list of rules instead of
//! spawning processes, and records every command it was asked to run.
//! Commands that match no rule succeed with empty output.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::executor::{CommandExecutor, CommandOutput, CommandSpec, ExecError};

/// Canned response for commands whose command line contains `needle`.
#[derive(Debug, Clone)]
pub struct ScriptRule {
    needle: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
    /// Files to write relative to the command's working directory.
    writes: Vec<(PathBuf, String)>,
    delay: Duration,
    spawn_error: bool,
}

impl ScriptRule {
    pub fn on(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            writes: Vec::new(),
            delay: Duration::ZERO,
            spawn_error: false,
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn writes(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.writes.push((path.into(), content.into()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Behave as if the program does not exist.
    pub fn spawn_error(mut self) -> Self {
        self.spawn_error = true;
        self
    }
}

/// Executor that replays [`ScriptRule`]s. The first matching rule wins.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Vec<ScriptRule>,
    calls: Mutex<Vec<CommandSpec>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: ScriptRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines executed so far, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    /// Position of the first command line containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.command_lines().iter().position(|c| c.contains(needle))
    }

    /// Highest number of commands that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        if spec.argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        self.calls.lock().unwrap().push(spec.clone());

        let line = spec.display();
        let rule = self.rules.iter().find(|r| line.contains(&r.needle));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(rule) = rule {
            if !rule.delay.is_zero() {
                tokio::time::sleep(rule.delay).await;
            }
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let Some(rule) = rule else {
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            });
        };

        if rule.spawn_error {
            return Err(ExecError::Spawn {
                program: spec.program().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
            });
        }

        let base = spec.cwd.clone().unwrap_or_default();
        for (path, content) in &rule.writes {
            std::fs::write(base.join(path), content).map_err(|source| ExecError::Io {
                program: spec.program().to_string(),
                source,
            })?;
        }

        Ok(CommandOutput {
            exit_code: rule.exit_code,
            stdout: rule.stdout.clone(),
            stderr: rule.stderr.clone(),
            duration_ms: rule.delay.as_millis() as u64,
        })
    }
}
