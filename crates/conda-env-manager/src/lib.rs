//! Conda-Env-Manager: conda environment provisioning for condaci
//!
//! This crate provides the environment layer for condaci. It describes
//! isolated conda environments, builds the front-end command lines that
//! create, populate, use and remove them, and hashes their inputs.
//!
//! ## Layer 2 - Environment/Tooling
//!
//! Focus: Reproducible environment identity and correct solver invocation.

pub mod descriptor;
mod error;
pub mod frontend;
pub mod hash;
pub mod requirements;

pub use descriptor::{ChannelPriority, EnvironmentDescriptor, InterpreterVersion};
pub use error::CondaError;
pub use frontend::{distribution_names, CondaCli, CondaFrontend};
pub use hash::{generate_environment_hash, generate_source_hash, EnvHash, HashSource};
pub use requirements::{parse_requirements, RequirementList};

/// Result type for conda-env-manager operations
pub type Result<T> = std::result::Result<T, CondaError>;

/// Check if any conda front-end is available
pub fn is_conda_available() -> bool {
    CondaFrontend::PREFERENCE.iter().any(|f| f.is_available())
}
