//! Forwards supervisor events to an external handler process.
//!
//! Events are serialized as JSON lines on the handler's stdin. A bounded
//! buffer sits between the supervisor and the handler; when it fills up,
//! events are dropped with a warning instead of stalling supervision.

use std::process::Stdio;

use entryflow_core::Invocation;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::SupervisorError;
use crate::event::SupervisorEvent;

#[derive(Debug, Clone)]
pub struct EventListener {
    pub command: Invocation,
    pub buffer: usize,
}

impl EventListener {
    pub fn new(command: Invocation, buffer: usize) -> Self {
        Self { command, buffer }
    }

    /// Spawns the handler and the tasks feeding it.
    ///
    /// The returned task finishes when the event source closes or the
    /// handler stops reading.
    pub fn spawn(
        &self,
        mut events: broadcast::Receiver<SupervisorEvent>,
    ) -> Result<JoinHandle<()>, SupervisorError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Listener {
                command: self.command.command_line(),
                source,
            })?;
        let mut stdin = child.stdin.take().ok_or_else(|| SupervisorError::Listener {
            command: self.command.command_line(),
            source: std::io::Error::other("handler stdin unavailable"),
        })?;
        info!(command = %self.command, "event listener started");

        let (tx, mut rx) = mpsc::channel::<SupervisorEvent>(self.buffer.max(1));

        let forward = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
                            warn!("event listener buffer full, dropping event");
                        } else if tx.is_closed() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut line = match serde_json::to_vec(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize event");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = stdin.write_all(&line).await {
                    warn!(error = %e, "event listener stopped reading");
                    break;
                }
                let _ = stdin.flush().await;
            }
            drop(rx);
            forward.abort();
            drop(stdin);
            let _ = child.wait().await;
        }))
    }
}
