//! Ordered, fail-fast execution of idempotent setup steps.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::StartupError;
use crate::invocation::{CommandRunner, Invocation};
use crate::runtime::RuntimeFlags;

/// Predicate deciding whether a step applies to this container start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    #[default]
    Always,
    DevMode,
    NotDevMode,
    Debug,
}

impl Condition {
    pub fn holds(self, flags: &RuntimeFlags) -> bool {
        match self {
            Self::Always => true,
            Self::DevMode => flags.dev_mode,
            Self::NotDevMode => !flags.dev_mode,
            Self::Debug => flags.debug,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::DevMode => "dev-mode",
            Self::NotDevMode => "not-dev-mode",
            Self::Debug => "debug",
        }
    }
}

/// A named unit of setup work.
///
/// The action behind `run` must tolerate running against state it already
/// initialized: a no-op or an overwrite, never a duplicate insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStep {
    pub name: String,
    pub run: Invocation,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub when: Condition,
}

fn default_required() -> bool {
    true
}

impl SetupStep {
    pub fn new(name: impl Into<String>, run: Invocation) -> Self {
        Self {
            name: name.into(),
            run,
            required: true,
            when: Condition::Always,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.when = condition;
        self
    }

    pub fn should_run(&self, flags: &RuntimeFlags) -> bool {
        self.when.holds(flags)
    }
}

/// What a pipeline run did, step by step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed_optional: Vec<String>,
}

/// Runs setup steps strictly in declared order.
#[derive(Debug, Clone, Copy)]
pub struct SetupPipeline<'a> {
    flags: &'a RuntimeFlags,
}

impl<'a> SetupPipeline<'a> {
    pub fn new(flags: &'a RuntimeFlags) -> Self {
        Self { flags }
    }

    /// Executes every applicable step.
    ///
    /// # Errors
    /// The first failing required step aborts the pipeline with
    /// [`StartupError::SetupStep`]; no later step runs.
    #[instrument(skip_all, fields(steps = steps.len()))]
    pub fn run<R: CommandRunner>(
        &self,
        steps: &[SetupStep],
        runner: &mut R,
    ) -> Result<SetupReport, StartupError> {
        let mut report = SetupReport::default();

        for step in steps {
            if !step.should_run(self.flags) {
                info!(step = %step.name, when = step.when.as_str(), "skip: condition not met");
                report.skipped.push(step.name.clone());
                continue;
            }

            info!(step = %step.name, command = %step.run, "run");
            match runner.run(&step.run) {
                Ok(()) => report.executed.push(step.name.clone()),
                Err(source) if step.required => {
                    return Err(StartupError::SetupStep {
                        step: step.name.clone(),
                        source,
                    });
                }
                Err(err) => {
                    warn!(step = %step.name, error = %err, "optional step failed, continuing");
                    report.executed.push(step.name.clone());
                    report.failed_optional.push(step.name.clone());
                }
            }
        }

        Ok(report)
    }
}
