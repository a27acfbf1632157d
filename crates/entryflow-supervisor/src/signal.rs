use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::SupervisorError;

/// Termination signals the supervisor reacts to.
///
/// Handlers are installed eagerly so a signal arriving while children start
/// is not lost.
#[derive(Debug)]
pub struct ShutdownSignals {
    term: Signal,
    int: Signal,
}

impl ShutdownSignals {
    pub fn install() -> Result<Self, SupervisorError> {
        Ok(Self {
            term: signal(SignalKind::terminate()).map_err(SupervisorError::Signal)?,
            int: signal(SignalKind::interrupt()).map_err(SupervisorError::Signal)?,
        })
    }

    /// Waits for SIGTERM or SIGINT and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.term.recv() => "SIGTERM",
            _ = self.int.recv() => "SIGINT",
        }
    }
}
