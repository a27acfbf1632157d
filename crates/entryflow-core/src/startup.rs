//! The sequential half of the entrypoint: gate, setup, overlays, capabilities.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, info_span};

use crate::capability::{CapabilityRegistrar, CapabilitySet};
use crate::config::StartupConfig;
use crate::error::StartupError;
use crate::invocation::CommandRunner;
use crate::overlay;
use crate::process::GroupSpec;
use crate::runtime::RuntimeFlags;
use crate::setup::{SetupPipeline, SetupReport};

/// Everything the supervisor needs once startup has completed.
#[derive(Debug, Clone)]
pub struct Handoff {
    pub capabilities: CapabilitySet,
    /// Shared environment for every supervised process.
    pub env: BTreeMap<String, String>,
    pub groups: Vec<GroupSpec>,
    pub setup: SetupReport,
}

/// Runs the startup stages in order against a parsed configuration.
#[derive(Debug)]
pub struct Startup<'a> {
    config: &'a StartupConfig,
    flags: RuntimeFlags,
}

impl<'a> Startup<'a> {
    pub fn new(config: &'a StartupConfig, flags: RuntimeFlags) -> Self {
        Self { config, flags }
    }

    /// Blocks on the readiness probe, if one is configured.
    pub fn wait<R: CommandRunner>(&self, runner: &mut R) -> Result<(), StartupError> {
        let Some(readiness) = &self.config.readiness else {
            info!("no readiness probe configured");
            return Ok(());
        };
        let _span = info_span!("readiness").entered();
        readiness.gate().wait_for_command(runner, &readiness.probe)?;
        Ok(())
    }

    pub fn setup<R: CommandRunner>(&self, runner: &mut R) -> Result<SetupReport, StartupError> {
        let _span = info_span!("setup").entered();
        SetupPipeline::new(&self.flags).run(&self.config.setup, runner)
    }

    /// Links development overlays; a no-op outside development mode.
    pub fn overlays(&self) -> Result<(), StartupError> {
        if !self.config.overlays_enabled(&self.flags) {
            return Ok(());
        }
        let _span = info_span!("overlays").entered();
        overlay::apply_all(&self.config.overlays)
    }

    pub fn capabilities<R: CommandRunner>(
        &self,
        runner: &mut R,
    ) -> Result<CapabilitySet, StartupError> {
        let _span = info_span!("capabilities").entered();
        self.registrar()
            .discover_and_register(&self.config.capabilities, runner)
    }

    /// Runs every stage and prepares the supervisor handoff.
    ///
    /// # Errors
    /// The first failing stage aborts the sequence; nothing is supervised.
    pub fn run<R: CommandRunner>(&self, runner: &mut R) -> Result<Handoff, StartupError> {
        info!(project = %self.config.project.name, dev_mode = self.flags.dev_mode, "startup begins");
        self.wait(runner)?;
        let setup = self.setup(runner)?;
        self.overlays()?;
        let capabilities = self.capabilities(runner)?;

        Ok(Handoff {
            env: self.shared_env(&capabilities),
            capabilities,
            groups: self.config.supervisor.groups.clone(),
            setup,
        })
    }

    /// The configured shared env plus the capability variable.
    pub fn shared_env(&self, capabilities: &CapabilitySet) -> BTreeMap<String, String> {
        let mut env = self.config.supervisor.env.clone();
        env.insert(
            self.config.supervisor.capability_env.clone(),
            capabilities.to_env_value(),
        );
        env
    }

    /// Describes what [`Self::run`] would do, without executing anything.
    pub fn plan(&self) -> StartupPlan {
        let registrar = self.registrar();
        StartupPlan {
            probe: self
                .config
                .readiness
                .as_ref()
                .map(|r| r.probe.command_line()),
            steps: self
                .config
                .setup
                .iter()
                .map(|step| PlannedStep {
                    name: step.name.clone(),
                    command: step.run.command_line(),
                    required: step.required,
                    runs: step.should_run(&self.flags),
                })
                .collect(),
            overlays: if self.config.overlays_enabled(&self.flags) {
                self.config
                    .overlays
                    .iter()
                    .map(|o| (o.source.clone(), o.target.clone()))
                    .collect()
            } else {
                Vec::new()
            },
            capabilities: self
                .config
                .capabilities
                .iter()
                .map(|c| (c.name.clone(), registrar.is_present(c)))
                .collect(),
            groups: self
                .config
                .supervisor
                .groups
                .iter()
                .map(|g| {
                    (
                        g.name.clone(),
                        g.programs.iter().map(|p| p.name.clone()).collect(),
                    )
                })
                .collect(),
        }
    }

    fn registrar(&self) -> CapabilityRegistrar {
        CapabilityRegistrar::new(self.config.root())
    }
}

/// A dry-run view of the startup sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupPlan {
    pub probe: Option<String>,
    pub steps: Vec<PlannedStep>,
    /// `(source, target)` pairs that will be linked.
    pub overlays: Vec<(PathBuf, PathBuf)>,
    /// Candidate name and whether its marker is present.
    pub capabilities: Vec<(String, bool)>,
    /// Group name and member program names.
    pub groups: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub name: String,
    pub command: String,
    pub required: bool,
    pub runs: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationError;
    use crate::invocation::Invocation;

    fn config(root: &std::path::Path) -> StartupConfig {
        let text = format!(
            r#"
            [project]
            name = "exchange"
            root = "{}"

            [readiness]
            probe = ["manage", "check"]
            interval_secs = 0
            max_attempts = 5

            [[setup]]
            name = "migrate"
            run = ["manage", "migrate"]

            [[setup]]
            name = "bootstrap-data"
            run = ["manage", "loaddata", "bootstrap"]
            when = "dev-mode"

            [[capabilities]]
            name = "fileservice"
            marker = "plugins/fileservice"
            install = ["pip", "install", "fileservice"]

            [supervisor.env]
            PYTHONUNBUFFERED = "1"

            [[supervisor.groups]]
            name = "web"
            [[supervisor.groups.programs]]
            name = "waitress"
            command = ["waitress-serve", "app:wsgi"]
            "#,
            root.display()
        );
        toml::from_str(&text).expect("test config parses")
    }

    #[test]
    fn run_sequences_stages_and_exports_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins/fileservice")).unwrap();
        let cfg = config(dir.path());
        let mut log = Vec::new();
        let mut probes = 0;
        let mut runner = |inv: &Invocation| -> Result<(), InvocationError> {
            log.push(inv.command_line());
            if inv.args == ["check"] {
                probes += 1;
                if probes < 2 {
                    return Err(InvocationError::Empty);
                }
            }
            Ok(())
        };

        let handoff = Startup::new(&cfg, RuntimeFlags::default())
            .run(&mut runner)
            .expect("startup should succeed");

        assert_eq!(
            log,
            vec![
                "manage check",
                "manage check",
                "manage migrate",
                "pip install fileservice"
            ]
        );
        assert_eq!(handoff.setup.skipped, vec!["bootstrap-data"]);
        assert_eq!(handoff.env["ENABLED_CAPABILITIES"], "fileservice");
        assert_eq!(handoff.env["PYTHONUNBUFFERED"], "1");
        assert_eq!(handoff.groups.len(), 1);
    }

    #[test]
    fn readiness_timeout_aborts_before_setup() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut log = Vec::new();
        let mut runner = |inv: &Invocation| -> Result<(), InvocationError> {
            log.push(inv.command_line());
            Err(InvocationError::Empty)
        };

        let err = Startup::new(&cfg, RuntimeFlags::default())
            .run(&mut runner)
            .unwrap_err();

        assert_eq!(err.stage(), "readiness");
        assert_eq!(log.len(), 5);
        assert!(log.iter().all(|c| c == "manage check"));
    }

    #[test]
    fn plan_reflects_flags_and_markers() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let flags = RuntimeFlags {
            dev_mode: true,
            debug: false,
        };

        let plan = Startup::new(&cfg, flags).plan();
        assert_eq!(plan.probe.as_deref(), Some("manage check"));
        assert!(plan.steps.iter().all(|s| s.runs));
        assert_eq!(plan.capabilities, vec![("fileservice".to_string(), false)]);
        assert_eq!(plan.groups, vec![("web".to_string(), vec!["waitress".to_string()])]);
    }
}
