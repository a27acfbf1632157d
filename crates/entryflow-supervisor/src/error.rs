use entryflow_core::ExitKind;
use thiserror::Error;

/// Failures inside the supervisor.
///
/// Only [`SupervisorError::Signal`] and [`SupervisorError::Listener`] stop
/// the supervisor; process failures are contained per group.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch process '{process}': {source}")]
    ProcessLaunch {
        process: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process '{process}' exited unexpectedly with {exit}")]
    ProcessCrash { process: String, exit: ExitKind },
    #[error("unknown process group '{0}'")]
    UnknownGroup(String),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
    #[error("failed to start event listener '{command}': {source}")]
    Listener {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
