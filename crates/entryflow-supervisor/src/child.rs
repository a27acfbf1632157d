//! The task that owns one supervised process for its whole lifetime.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use entryflow_core::{ExitDecision, ExitKind, ProcessSpec, ProcessState, RestartPolicy};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::error::SupervisorError;
use crate::event::Stream;
use crate::logs::LogSender;
use crate::registry::Registry;

/// Timing shared by every managed process.
#[derive(Debug, Clone)]
pub(crate) struct Timing {
    pub backoff: Duration,
    pub grace: Duration,
}

pub(crate) struct ManagedProcess {
    pub spec: ProcessSpec,
    pub group: String,
    pub stop_as_group: bool,
    pub env: Arc<BTreeMap<String, String>>,
    pub workdir: Option<PathBuf>,
    pub timing: Timing,
    pub registry: Registry,
    pub logs: LogSender,
    /// Fires when this process's group is asked to stop.
    pub stop: watch::Receiver<bool>,
    /// Used to stop the whole group when this process dies for good.
    pub group_stop: Arc<watch::Sender<bool>>,
}

enum Outcome {
    Exited(ExitKind),
    WaitFailed(std::io::Error),
    StopRequested,
}

impl ManagedProcess {
    #[instrument(name = "process", skip_all, fields(name = %self.spec.name, group = %self.group))]
    pub(crate) async fn run(mut self) {
        self.supervise().await;
        self.registry.retire(&self.group).await;
    }

    async fn supervise(&mut self) {
        let name = self.spec.name.clone();
        let mut restarts = 0u32;

        loop {
            let launched = self.registry.launch(&name, || self.command().spawn()).await;
            let mut child = match launched {
                Ok(Some(child)) => child,
                Ok(None) => {
                    self.registry.transition(&name, ProcessState::Stopped, None).await;
                    return;
                }
                Err(source) => {
                    let err = SupervisorError::ProcessLaunch {
                        process: name.clone(),
                        source,
                    };
                    error!(error = %err, "launch failed");
                    self.registry.transition(&name, ProcessState::Fatal, None).await;
                    self.stop_group("launch failure").await;
                    return;
                }
            };

            self.attach_logs(&mut child);
            self.registry.transition(&name, ProcessState::Running, None).await;
            info!(pid = ?child.id(), "running");

            let outcome = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => Outcome::Exited(exit_kind(status)),
                    Err(e) => Outcome::WaitFailed(e),
                },
                _ = stop_requested(&mut self.stop) => Outcome::StopRequested,
            };

            let exit = match outcome {
                Outcome::StopRequested => {
                    let exit = terminate(&mut child, self.timing.grace).await;
                    info!(exit = ?exit, "stopped");
                    self.registry.transition(&name, ProcessState::Stopped, exit).await;
                    return;
                }
                Outcome::WaitFailed(e) => {
                    error!(error = %e, "failed to wait on process");
                    self.registry.transition(&name, ProcessState::Fatal, None).await;
                    self.stop_group("wait failure").await;
                    return;
                }
                Outcome::Exited(exit) => exit,
            };

            self.registry
                .transition(&name, ProcessState::after(exit), Some(exit))
                .await;

            let stopping = *self.stop.borrow();
            if stopping || self.registry.is_shutting_down().await {
                self.registry.transition(&name, ProcessState::Stopped, Some(exit)).await;
                return;
            }

            match self.spec.decide(exit, restarts) {
                ExitDecision::Restart => {
                    let crash = SupervisorError::ProcessCrash {
                        process: name.clone(),
                        exit,
                    };
                    warn!(error = %crash, backoff = ?self.timing.backoff, "restarting");
                    self.registry.transition(&name, ProcessState::Restarting, Some(exit)).await;

                    let interrupted = tokio::select! {
                        _ = tokio::time::sleep(self.timing.backoff) => false,
                        _ = stop_requested(&mut self.stop) => true,
                    };
                    if interrupted {
                        self.registry.transition(&name, ProcessState::Stopped, None).await;
                        return;
                    }
                    restarts = self.registry.note_restart(&name).await;
                }
                ExitDecision::Complete => {
                    info!(%exit, "completed");
                    self.registry.transition(&name, ProcessState::Stopped, Some(exit)).await;
                    // run-once jobs finish quietly; a `never` member takes its group down
                    if self.spec.restart == RestartPolicy::Never {
                        self.stop_group("process exited").await;
                    }
                    return;
                }
                ExitDecision::GiveUp => {
                    error!(%exit, restarts, "giving up on process");
                    self.registry.transition(&name, ProcessState::Fatal, Some(exit)).await;
                    self.stop_group("process gave up").await;
                    return;
                }
            }
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.spec.command.program);
        command
            .args(&self.spec.command.args)
            .envs(self.env.iter())
            .envs(self.spec.env.iter())
            .stdin(Stdio::null())
            .stdout(routed(self.spec.stdout))
            .stderr(routed(self.spec.stderr))
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    fn attach_logs(&self, child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            self.logs.drain(stdout, &self.spec.name, Stream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.logs.drain(stderr, &self.spec.name, Stream::Stderr);
        }
    }

    async fn stop_group(&self, reason: &str) {
        if self.stop_as_group {
            warn!(reason, "stopping the rest of the group");
            self.registry.begin_group_stop(&self.group).await;
            self.group_stop.send_replace(true);
        }
    }
}

fn routed(enabled: bool) -> Stdio {
    if enabled {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

/// Resolves once the watched flag is true.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sends SIGTERM to the child's process group, then SIGKILL after `grace`.
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitKind> {
    let Some(pid) = child.id() else {
        // already reaped
        return child.try_wait().ok().flatten().map(exit_kind);
    };

    if !signal_group(pid, "TERM").await {
        // no signal went out; waiting the grace period is pointless
        error!(pid, "could not deliver SIGTERM, killing the process");
        let _ = child.start_kill();
        return child.wait().await.ok().map(exit_kind);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(exit_kind(status)),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to wait on terminated process");
            None
        }
        Err(_) => {
            warn!(pid, ?grace, "grace period elapsed, killing");
            signal_group(pid, "KILL").await;
            let _ = child.start_kill();
            child.wait().await.ok().map(exit_kind)
        }
    }
}

/// Signals every process in the group led by `pid`.
///
/// Returns false only when `kill` could not be run at all; a non-zero status
/// usually means the group is already gone.
async fn signal_group(pid: u32, signal: &str) -> bool {
    let result = Command::new("sh")
        .arg("-c")
        .arg(format!("kill -{signal} -{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(pid, signal, %status, "kill reported failure");
            true
        }
        Err(e) => {
            error!(pid, signal, error = %e, "failed to run kill");
            false
        }
    }
}

pub(crate) fn exit_kind(status: ExitStatus) -> ExitKind {
    if let Some(code) = status.code() {
        return ExitKind::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitKind::Signal(signal);
        }
    }
    ExitKind::Code(-1)
}
