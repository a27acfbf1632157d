//! Declarative model of supervised processes and their lifecycle.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::invocation::Invocation;

/// What happens after a supervised process exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Long-running process: any exit, including status 0, is abnormal.
    #[default]
    Always,
    /// Run-once process: a clean exit is final, a failure is restarted.
    OnFailure,
    Never,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
}

impl ExitKind {
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl Display for ExitKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Outcome of the restart policy for one exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Restart,
    /// The process finished its job and stays stopped.
    Complete,
    /// The process stopped abnormally and will not be restarted.
    GiveUp,
}

impl RestartPolicy {
    pub fn after_exit(self, exit: ExitKind) -> ExitDecision {
        match (self, exit.is_clean()) {
            (Self::Always, _) => ExitDecision::Restart,
            (Self::OnFailure, true) => ExitDecision::Complete,
            (Self::OnFailure, false) => ExitDecision::Restart,
            (Self::Never, true) => ExitDecision::Complete,
            (Self::Never, false) => ExitDecision::GiveUp,
        }
    }
}

fn enabled() -> bool {
    true
}

/// A supervised unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub command: Invocation,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Forward standard output to the multiplexed log.
    #[serde(default = "enabled")]
    pub stdout: bool,
    /// Forward standard error to the multiplexed log.
    #[serde(default = "enabled")]
    pub stderr: bool,
    /// Extra environment, applied over the supervisor's shared env.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Upper bound on restarts; `None` restarts forever.
    #[serde(default)]
    pub start_retries: Option<u32>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: Invocation) -> Self {
        Self {
            name: name.into(),
            command,
            restart: RestartPolicy::default(),
            stdout: true,
            stderr: true,
            env: BTreeMap::new(),
            start_retries: None,
        }
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    pub fn start_retries(mut self, retries: u32) -> Self {
        self.start_retries = Some(retries);
        self
    }

    /// Applies the restart policy and the retry budget to an exit.
    ///
    /// `restarts` is the number of restarts already performed.
    pub fn decide(&self, exit: ExitKind, restarts: u32) -> ExitDecision {
        match self.restart.after_exit(exit) {
            ExitDecision::Restart if self.start_retries.is_some_and(|max| restarts >= max) => {
                ExitDecision::GiveUp
            }
            decision => decision,
        }
    }
}

/// Processes started together and, with `stop_as_group`, stopped together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default = "enabled")]
    pub stop_as_group: bool,
    pub programs: Vec<ProcessSpec>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, programs: Vec<ProcessSpec>) -> Self {
        Self {
            name: name.into(),
            stop_as_group: true,
            programs,
        }
    }
}

/// Lifecycle of one supervised process.
///
/// `Stopped → Starting → Running → (Exited | Signaled) → (Restarting → Starting | Stopped)`,
/// with `Fatal` for launch failures and exhausted retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Exited,
    Signaled,
    Restarting,
    Fatal,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Signaled => "signaled",
            Self::Restarting => "restarting",
            Self::Fatal => "fatal",
        }
    }

    pub fn after(exit: ExitKind) -> Self {
        match exit {
            ExitKind::Code(_) => Self::Exited,
            ExitKind::Signal(_) => Self::Signaled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Fatal)
    }
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
