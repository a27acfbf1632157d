use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use entryflow_core::constants::{DEFAULT_GRACE_SECS, DEFAULT_RESTART_BACKOFF_SECS};
use entryflow_core::GroupSpec;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::child::{ManagedProcess, Timing};
use crate::error::SupervisorError;
use crate::event::SupervisorEvent;
use crate::listener::EventListener;
use crate::logs::{spawn_sink, LogSender};
use crate::registry::Registry;
use crate::signal::ShutdownSignals;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Wait between an unexpected exit and the restart.
    pub restart_backoff: Duration,
    /// Time a process gets to exit after SIGTERM before it is killed.
    pub grace: Duration,
    pub workdir: Option<PathBuf>,
    pub listener: Option<EventListener>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_secs(DEFAULT_RESTART_BACKOFF_SECS),
            grace: Duration::from_secs(DEFAULT_GRACE_SECS),
            workdir: None,
            listener: None,
        }
    }
}

/// Members of a group that were awaited by [`Supervisor::stop_group`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStopReport {
    pub group: String,
    pub members: Vec<String>,
}

struct GroupHandle {
    spec: GroupSpec,
    stop: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns every supervised process group for the container's lifetime.
///
/// Must be created inside a tokio runtime.
pub struct Supervisor {
    groups: BTreeMap<String, GroupHandle>,
    order: Vec<String>,
    env: Arc<BTreeMap<String, String>>,
    options: SupervisorOptions,
    registry: Registry,
    logs: Option<LogSender>,
    sink: JoinHandle<()>,
    listener: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// A supervisor writing the multiplexed log to standard output.
    pub fn new(
        groups: Vec<GroupSpec>,
        env: BTreeMap<String, String>,
        options: SupervisorOptions,
    ) -> Self {
        Self::with_sink(groups, env, options, std::io::stdout())
    }

    pub fn with_sink<W>(
        groups: Vec<GroupSpec>,
        env: BTreeMap<String, String>,
        options: SupervisorOptions,
        sink: W,
    ) -> Self
    where
        W: Write + Send + 'static,
    {
        let registry = Registry::new(EVENT_CAPACITY);
        let (logs, sink) = spawn_sink(sink, registry.clone());
        let order = groups.iter().map(|g| g.name.clone()).collect();
        let groups = groups
            .into_iter()
            .map(|spec| {
                let (stop, _) = watch::channel(false);
                let handle = GroupHandle {
                    spec,
                    stop: Arc::new(stop),
                    tasks: Vec::new(),
                };
                (handle.spec.name.clone(), handle)
            })
            .collect();

        Self {
            groups,
            order,
            env: Arc::new(env),
            options,
            registry,
            logs: Some(logs),
            sink,
            listener: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.registry.subscribe()
    }

    /// Starts the listener, then every group in declaration order.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if let Some(listener) = &self.options.listener {
            self.listener = Some(listener.spawn(self.registry.subscribe())?);
        }
        for name in self.order.clone() {
            self.start_group(&name).await?;
        }
        Ok(())
    }

    /// Launches every member of a group together.
    #[instrument(skip(self))]
    pub async fn start_group(&mut self, name: &str) -> Result<(), SupervisorError> {
        let Some(logs) = self.logs.clone() else {
            return Ok(());
        };
        let handle = self
            .groups
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownGroup(name.to_string()))?;

        handle.stop.send_replace(false);
        for spec in &handle.spec.programs {
            self.registry.register(&spec.name, &handle.spec.name).await;
            let process = ManagedProcess {
                spec: spec.clone(),
                group: handle.spec.name.clone(),
                stop_as_group: handle.spec.stop_as_group,
                env: Arc::clone(&self.env),
                workdir: self.options.workdir.clone(),
                timing: Timing {
                    backoff: self.options.restart_backoff,
                    grace: self.options.grace,
                },
                registry: self.registry.clone(),
                logs: logs.clone(),
                stop: handle.stop.subscribe(),
                group_stop: Arc::clone(&handle.stop),
            };
            self.registry.enlist(&handle.spec.name).await;
            handle.tasks.push(tokio::spawn(process.run()));
        }
        info!(members = handle.spec.programs.len(), "group started");
        Ok(())
    }

    /// Sends SIGTERM to every member and returns once all of them exited.
    #[instrument(skip(self))]
    pub async fn stop_group(&mut self, name: &str) -> Result<GroupStopReport, SupervisorError> {
        let handle = self
            .groups
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownGroup(name.to_string()))?;

        self.registry.begin_group_stop(name).await;
        handle.stop.send_replace(true);
        for task in std::mem::take(&mut handle.tasks) {
            if let Err(e) = task.await {
                error!(error = %e, "process task panicked");
            }
        }

        let report = GroupStopReport {
            group: name.to_string(),
            members: handle.spec.programs.iter().map(|p| p.name.clone()).collect(),
        };
        self.registry.finish_group_stop(name).await;
        info!("group stopped");
        Ok(report)
    }

    /// Stops every group, flushes the log sink and the listener.
    pub async fn shutdown(mut self) {
        if !self.registry.begin_shutdown().await {
            return;
        }
        info!(grace = ?self.options.grace, "shutting down");

        // signal all groups first so they terminate in parallel
        for handle in self.groups.values() {
            handle.stop.send_replace(true);
        }
        for name in self.order.clone() {
            if let Err(e) = self.stop_group(&name).await {
                warn!(error = %e, "failed to stop group");
            }
        }

        self.logs = None;
        if let Err(e) = (&mut self.sink).await {
            warn!(error = %e, "log sink task failed");
        }
        if let Some(listener) = self.listener.take() {
            drop(self.registry);
            let _ = listener.await;
        }
        info!("supervisor stopped");
    }

    /// Runs all groups until `shutdown` resolves, then stops them.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            self.shutdown().await;
            return Err(e);
        }
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }

    /// Runs all groups until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let mut signals = ShutdownSignals::install()?;
        self.run_until(async move {
            let name = signals.recv().await;
            info!(signal = name, "termination signal received");
        })
        .await
    }
}
