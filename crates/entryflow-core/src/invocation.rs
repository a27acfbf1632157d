use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::InvocationError;

/// An external command, written in configuration as an argv array.
///
/// Example: `["python", "manage.py", "migrate", "--noinput"]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Invocation {
    /// The executable program (e.g., "python", "pip").
    pub program: String,
    /// The arguments to pass to the program.
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Renders the command line for logs and error messages.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

impl TryFrom<Vec<String>> for Invocation {
    type Error = InvocationError;

    fn try_from(mut argv: Vec<String>) -> Result<Self, Self::Error> {
        if argv.is_empty() {
            return Err(InvocationError::Empty);
        }
        let program = argv.remove(0);
        Ok(Self {
            program,
            args: argv,
        })
    }
}

impl From<Invocation> for Vec<String> {
    fn from(invocation: Invocation) -> Self {
        let mut argv = Vec::with_capacity(invocation.args.len() + 1);
        argv.push(invocation.program);
        argv.extend(invocation.args);
        argv
    }
}

/// Runs blocking external commands for the startup stages.
///
/// Implementations only report success or failure; output goes straight to
/// the container's log stream.
pub trait CommandRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<(), InvocationError>;
}

impl<F> CommandRunner for F
where
    F: FnMut(&Invocation) -> Result<(), InvocationError>,
{
    fn run(&mut self, invocation: &Invocation) -> Result<(), InvocationError> {
        self(invocation)
    }
}

/// Runs commands as real child processes of the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct HostRunner {
    workdir: Option<PathBuf>,
}

impl HostRunner {
    pub fn new(workdir: Option<PathBuf>) -> Self {
        Self { workdir }
    }
}

impl CommandRunner for HostRunner {
    #[instrument(skip_all, fields(command = %invocation))]
    fn run(&mut self, invocation: &Invocation) -> Result<(), InvocationError> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        debug!("spawning");
        let status = command.status().map_err(|source| InvocationError::Spawn {
            command: invocation.command_line(),
            source,
        })?;

        if !status.success() {
            return Err(InvocationError::Status {
                command: invocation.command_line(),
                status,
            });
        }

        Ok(())
    }
}
