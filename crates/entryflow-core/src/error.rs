//! Error taxonomy for the sequential startup stages.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failure to run a single external command.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("empty command argv")]
    Empty,
    #[error("failed to start command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command failed with status {status}: {command}")]
    Status { command: String, status: ExitStatus },
}

/// A fatal failure in one of the startup stages that run before supervision.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("dependency never became ready after {attempts} attempts: {last_error}")]
    ReadinessTimeout { attempts: u32, last_error: String },
    #[error("setup step '{step}' failed")]
    SetupStep {
        step: String,
        #[source]
        source: InvocationError,
    },
    #[error("capability '{capability}' was detected but could not be installed")]
    CapabilityInstall {
        capability: String,
        #[source]
        source: InvocationError,
    },
    #[error("failed to link overlay '{}'", target.display())]
    Overlay {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    /// Name of the startup stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ReadinessTimeout { .. } => "readiness",
            Self::SetupStep { .. } => "setup",
            Self::CapabilityInstall { .. } => "capabilities",
            Self::Overlay { .. } => "overlays",
        }
    }
}
