//! Conda front-ends and the command lines they are driven with.
//!
//! Builders return argv vectors (first element is the executable); running
//! them is the orchestrator's job.

use crate::descriptor::EnvironmentDescriptor;
use crate::error::CondaError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;
use tracing::debug;

/// Supported conda-compatible package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondaFrontend {
    Conda,
    Mamba,
    Micromamba,
}

impl CondaFrontend {
    /// Detection order when no front-end is configured.
    pub const PREFERENCE: [CondaFrontend; 3] = [
        CondaFrontend::Micromamba,
        CondaFrontend::Mamba,
        CondaFrontend::Conda,
    ];

    /// Executable name.
    pub fn binary(&self) -> &'static str {
        match self {
            CondaFrontend::Conda => "conda",
            CondaFrontend::Mamba => "mamba",
            CondaFrontend::Micromamba => "micromamba",
        }
    }

    /// Whether `<binary> --version` succeeds on this machine.
    pub fn is_available(&self) -> bool {
        Command::new(self.binary())
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// First available front-end in [`Self::PREFERENCE`] order.
    pub fn detect() -> Result<Self> {
        for frontend in Self::PREFERENCE {
            if frontend.is_available() {
                debug!(frontend = frontend.binary(), "Detected conda front-end");
                return Ok(frontend);
            }
        }
        Err(CondaError::CondaNotFound)
    }
}

/// A conda front-end bound to the executable that invokes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaCli {
    frontend: CondaFrontend,
    executable: String,
}

impl CondaCli {
    /// Use the front-end's default executable name from `PATH`.
    pub fn new(frontend: CondaFrontend) -> Self {
        Self {
            frontend,
            executable: frontend.binary().to_string(),
        }
    }

    /// Use an explicit executable; its file name selects the front-end.
    pub fn from_executable(executable: &str) -> Result<Self> {
        let frontend = executable.parse()?;
        Ok(Self {
            frontend,
            executable: executable.trim().to_string(),
        })
    }

    /// Detect the first available front-end.
    pub fn detect() -> Result<Self> {
        CondaFrontend::detect().map(Self::new)
    }

    pub fn frontend(&self) -> CondaFrontend {
        self.frontend
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// `create` an environment pinned to the descriptor's interpreter.
    pub fn create_command(&self, env: &EnvironmentDescriptor) -> Vec<String> {
        let mut cmd = vec![
            self.executable.clone(),
            "create".to_string(),
            "--yes".to_string(),
            "--name".to_string(),
            env.name.clone(),
            "--override-channels".to_string(),
            "--channel".to_string(),
            env.channel.clone(),
        ];
        if let Some(flag) = env.channel_priority.solver_flag() {
            cmd.push(flag.to_string());
        }
        cmd.push(env.interpreter_spec());
        cmd
    }

    /// Run `program args...` inside the named environment.
    pub fn run_command<S: AsRef<str>>(&self, env_name: &str, program: &[S]) -> Vec<String> {
        let mut cmd = vec![self.executable.clone(), "run".to_string()];
        if self.captures_run_output() {
            cmd.push("--no-capture-output".to_string());
        }
        cmd.push("--name".to_string());
        cmd.push(env_name.to_string());
        cmd.extend(program.iter().map(|s| s.as_ref().to_string()));
        cmd
    }

    /// `pip install -r <requirements> <extra tools...>` inside the environment.
    pub fn pip_install_command(
        &self,
        env_name: &str,
        requirements: &Path,
        extra_tools: &[String],
    ) -> Vec<String> {
        let mut program = vec![
            "python".to_string(),
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "-r".to_string(),
            requirements.display().to_string(),
        ];
        program.extend(extra_tools.iter().cloned());
        self.run_command(env_name, &program)
    }

    /// Import every module in `modules` with the environment's interpreter.
    pub fn import_check_command(&self, env_name: &str, modules: &[String]) -> Vec<String> {
        let program = [
            "python".to_string(),
            "-c".to_string(),
            format!("import {}", modules.join(", ")),
        ];
        self.run_command(env_name, &program)
    }

    /// Look up the installed version of every distribution in `dists`; exits
    /// non-zero on the first one that is missing.
    pub fn distribution_check_command(&self, env_name: &str, dists: &[String]) -> Vec<String> {
        let mut program = vec![
            "python".to_string(),
            "-c".to_string(),
            DISTRIBUTION_CHECK.to_string(),
        ];
        program.extend(dists.iter().cloned());
        self.run_command(env_name, &program)
    }

    /// Remove the environment and everything installed into it.
    pub fn remove_command(&self, env_name: &str) -> Vec<String> {
        match self.frontend {
            CondaFrontend::Micromamba => vec![
                self.executable.clone(),
                "env".to_string(),
                "remove".to_string(),
                "--yes".to_string(),
                "--name".to_string(),
                env_name.to_string(),
            ],
            CondaFrontend::Conda | CondaFrontend::Mamba => vec![
                self.executable.clone(),
                "remove".to_string(),
                "--yes".to_string(),
                "--all".to_string(),
                "--name".to_string(),
                env_name.to_string(),
            ],
        }
    }

    /// conda and mamba buffer `run` output unless told otherwise.
    fn captures_run_output(&self) -> bool {
        !matches!(self.frontend, CondaFrontend::Micromamba)
    }
}

impl FromStr for CondaFrontend {
    type Err = CondaError;

    fn from_str(s: &str) -> Result<Self> {
        let name = Path::new(s.trim())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match name.trim_end_matches(".exe") {
            "conda" => Ok(CondaFrontend::Conda),
            "mamba" => Ok(CondaFrontend::Mamba),
            "micromamba" => Ok(CondaFrontend::Micromamba),
            _ => Err(CondaError::UnknownFrontend(s.to_string())),
        }
    }
}

impl fmt::Display for CondaFrontend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Python 3.7 predates `importlib.metadata`; `pkg_resources` ships with
/// every pip-enabled environment there.
const DISTRIBUTION_CHECK: &str = "\
import sys
try:
    from importlib.metadata import version
except ImportError:
    from pkg_resources import get_distribution
    def version(name):
        return get_distribution(name).version
for name in sys.argv[1:]:
    print(name, version(name))
";

/// Distribution names of pip requirement strings, without version pins,
/// extras or environment markers.
///
/// Distribution names are not module names: `pyyaml` imports as `yaml`.
pub fn distribution_names(tools: &[String]) -> Vec<String> {
    tools
        .iter()
        .map(|t| {
            t.split(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '[' | ';' | '@'))
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()
        })
        .filter(|n| !n.is_empty())
        .collect()
}
