use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use entryflow_core::constants::CONFIG_FILE;
use entryflow_core::{
    CapabilitySet, GroupSpec, HostRunner, RuntimeFlags, Stage, StageRef, Startup, StartupConfig,
    StartupError,
};
use entryflow_supervisor::{EventListener, Supervisor, SupervisorOptions};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod init;
mod plan;
mod styles;

use styles as s;

/// The command-line interface for entryflow.
#[derive(Debug, Parser)]
#[command(name = "entryflow")]
#[command(version)]
#[command(styles = s::get_clap_styles())]
#[command(
    help_template = "{bin} {version}\n\n{about-with-newline}{usage-heading} {usage}\n\n{all-args}{after-help}"
)]
#[command(about = "Container entrypoint: wait, set up, then supervise")]
#[command(
    long_about = "entryflow brings a containerized application from a cold start to a
supervised steady state: it waits for the database, runs idempotent setup
steps, installs optional capabilities it finds on disk and then keeps the
long-running processes alive until the container is asked to stop.

Stages:
  init              Write a starter entryflow.toml
  run               Every stage in order, then supervise (default)
  wait              Block until the readiness probe succeeds
  setup             Run the setup steps
  capabilities      Detect and install optional capabilities
  supervise         Supervise the configured process groups
  plan              Print what 'run' would do, executing nothing
"
)]
#[command(
    after_help = "\x1b[1;32mExamples:\x1b[0m\n  \x1b[36mentryflow\x1b[0m                 \x1b[2m# Full startup, then supervise\x1b[0m\n  \x1b[36mentryflow init\x1b[0m            \x1b[2m# Write entryflow.toml\x1b[0m\n  \x1b[36mDEV_MODE=1 entryflow plan\x1b[0m \x1b[2m# Review the development sequence\x1b[0m\n  \x1b[36mentryflow setup plan\x1b[0m      \x1b[2m# Same as plan (shorthand for setup:plan)\x1b[0m"
)]
pub(crate) struct Cli {
    /// Stage in canonical form, for example: `run`, `setup`, `setup:plan`
    stage: Option<String>,
    /// Optional selector (supports `entryflow setup plan` style)
    selector: Option<String>,
    /// Path to the entryflow config file.
    #[arg(long, default_value = CONFIG_FILE)]
    config: String,
    /// Print generated files to stdout instead of writing them.
    #[arg(long, default_value_t = false)]
    stdout: bool,
    /// Overwrite generated files if they already exist.
    #[arg(long, default_value_t = false)]
    force: bool,
}

fn main() -> Result<()> {
    let flags = RuntimeFlags::from_env();
    let level = if flags.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let cli = Cli::parse();
    debug!("parsed cli arguments: {:?}", cli);

    let stage_text = match (&cli.stage, &cli.selector) {
        (Some(stage), Some(selector)) => format!("{stage}:{selector}"),
        (Some(stage), None) => stage.clone(),
        (None, _) => Stage::Run.as_str().to_string(),
    };
    let stage = StageRef::from_str(&stage_text)
        .map_err(|e| anyhow!("failed to parse stage '{}': {e}", stage_text))?
        .normalized();

    if stage.stage == Stage::Init {
        return init::run(&cli, stage.selector.as_deref());
    }
    if let Some(selector) = &stage.selector {
        bail!("stage '{}' takes no selector (got '{}')", stage.stage.as_str(), selector);
    }

    let cfg = StartupConfig::load_from_file(&cli.config)
        .with_context(|| format!("unable to load config '{}'", cli.config))?;

    execute(&cfg, flags, stage.stage)
}

/// Executes one stage against a loaded configuration.
fn execute(cfg: &StartupConfig, flags: RuntimeFlags, stage: Stage) -> Result<()> {
    let startup = Startup::new(cfg, flags);
    let mut runner = HostRunner::new(Some(cfg.root()));

    match stage {
        Stage::Init => bail!("init runs before a config exists"),
        Stage::Plan => {
            let color = std::io::stdout().is_terminal();
            print!("{}", plan::render(&startup.plan(), &flags, color));
            Ok(())
        }
        Stage::Wait => startup.wait(&mut runner).map_err(startup_failed),
        Stage::Setup => {
            let report = startup.setup(&mut runner).map_err(startup_failed)?;
            info!(
                executed = report.executed.len(),
                skipped = report.skipped.len(),
                failed_optional = report.failed_optional.len(),
                "setup complete"
            );
            Ok(())
        }
        Stage::Capabilities => {
            startup.overlays().map_err(startup_failed)?;
            let set = startup.capabilities(&mut runner).map_err(startup_failed)?;
            println!("{}={}", cfg.supervisor.capability_env, set);
            Ok(())
        }
        Stage::Supervise => {
            // capabilities were exported by an earlier `capabilities` run, if any
            let set = std::env::var(&cfg.supervisor.capability_env)
                .map(|value| CapabilitySet::from_env_value(&value))
                .unwrap_or_default();
            supervise(cfg, cfg.supervisor.groups.clone(), startup.shared_env(&set))
        }
        Stage::Run => {
            let handoff = startup.run(&mut runner).map_err(startup_failed)?;
            info!(
                capabilities = %handoff.capabilities,
                setup_steps = handoff.setup.executed.len(),
                "startup complete, handing off to the supervisor"
            );
            supervise(cfg, handoff.groups, handoff.env)
        }
    }
}

/// Logs a startup failure with its stage; the binary then exits non-zero.
fn startup_failed(err: StartupError) -> anyhow::Error {
    let stage = err.stage();
    error!(stage, error = %err, "startup failed");
    anyhow::Error::new(err).context(format!("{stage} stage failed"))
}

/// Blocks on the supervisor until a termination signal arrives.
fn supervise(
    cfg: &StartupConfig,
    groups: Vec<GroupSpec>,
    env: BTreeMap<String, String>,
) -> Result<()> {
    if groups.is_empty() {
        bail!("no process groups configured in [supervisor]");
    }

    let options = SupervisorOptions {
        restart_backoff: cfg.supervisor.restart_backoff(),
        grace: cfg.supervisor.grace(),
        workdir: Some(cfg.root()),
        listener: cfg
            .supervisor
            .listener
            .as_ref()
            .map(|l| EventListener::new(l.command.clone(), l.buffer)),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(async move { Supervisor::new(groups, env, options).run().await })?;
    Ok(())
}
