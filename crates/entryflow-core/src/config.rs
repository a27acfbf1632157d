use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::capability::CapabilityDescriptor;
use crate::constants::*;
use crate::invocation::Invocation;
use crate::overlay::OverlayLink;
use crate::process::GroupSpec;
use crate::readiness::ReadinessGate;
use crate::runtime::RuntimeFlags;
use crate::setup::SetupStep;

/// Everything the orchestrator needs, parsed once from `entryflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    pub project: ProjectConfig,
    pub readiness: Option<ReadinessConfig>,
    #[serde(default)]
    pub setup: Vec<SetupStep>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
    /// Symlinks applied in development mode only.
    #[serde(default)]
    pub overlays: Vec<OverlayLink>,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl StartupConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        let cfg = toml::from_str::<Self>(&text)
            .with_context(|| format!("failed to parse TOML config: {path}"))?;
        cfg.validate()
            .with_context(|| format!("invalid config: {path}"))?;
        Ok(cfg)
    }

    /// Rejects configurations the supervisor cannot represent.
    pub fn validate(&self) -> Result<()> {
        let mut steps = HashSet::new();
        for step in &self.setup {
            if !steps.insert(step.name.as_str()) {
                bail!("duplicate setup step '{}'", step.name);
            }
        }

        let mut groups = HashSet::new();
        let mut programs = HashSet::new();
        for group in &self.supervisor.groups {
            if !groups.insert(group.name.as_str()) {
                bail!("duplicate process group '{}'", group.name);
            }
            if group.programs.is_empty() {
                bail!("process group '{}' has no programs", group.name);
            }
            for program in &group.programs {
                if !programs.insert(program.name.as_str()) {
                    bail!("duplicate program '{}'", program.name);
                }
            }
        }

        Ok(())
    }

    /// Directory commands run in and relative marker paths resolve against.
    pub fn root(&self) -> PathBuf {
        self.project
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn overlays_enabled(&self, flags: &RuntimeFlags) -> bool {
        flags.dev_mode && !self.overlays.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// Idempotent check against the dependent service.
    pub probe: Invocation,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// `0` waits forever.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
}

impl ReadinessConfig {
    pub fn gate(&self) -> ReadinessGate {
        let max_attempts = (self.max_attempts > 0).then_some(self.max_attempts);
        ReadinessGate::new(Duration::from_secs(self.interval_secs), max_attempts)
    }
}

fn default_interval() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

fn default_attempts() -> u32 {
    DEFAULT_PROBE_ATTEMPTS
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    #[serde(default = "default_backoff")]
    pub restart_backoff_secs: u64,
    /// Variable the capability set is exported under.
    #[serde(default = "default_capability_env")]
    pub capability_env: String,
    /// Environment shared by every supervised process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    pub listener: Option<ListenerConfig>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_secs: DEFAULT_GRACE_SECS,
            restart_backoff_secs: DEFAULT_RESTART_BACKOFF_SECS,
            capability_env: default_capability_env(),
            env: BTreeMap::new(),
            groups: Vec::new(),
            listener: None,
        }
    }
}

impl SupervisorConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }
}

fn default_grace() -> u64 {
    DEFAULT_GRACE_SECS
}

fn default_backoff() -> u64 {
    DEFAULT_RESTART_BACKOFF_SECS
}

fn default_capability_env() -> String {
    ENV_CAPABILITIES.to_string()
}

/// External handler receiving supervisor events as JSON lines on stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub command: Invocation,
    /// Events held in memory while the handler catches up.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

fn default_buffer() -> usize {
    DEFAULT_LISTENER_BUFFER
}
