//! Shared record of every managed process.
//!
//! All mutation goes through one lock. Launching a child and marking it
//! `Starting` happen under the same acquisition that checks the shutdown
//! flag, so a restart decision can never race a shutdown.
//!
//! The registry also counts the live process tasks of each group and emits
//! [`SupervisorEvent::GroupStopped`] exactly once per stop request, when the
//! last task of a stopping group has finished.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

use entryflow_core::{ExitKind, ProcessState};
use tokio::process::Child;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::event::SupervisorEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub group: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub restarts: u32,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, ProcessRecord>,
    shutting_down: bool,
    /// Running process tasks per group.
    live: BTreeMap<String, usize>,
    /// Groups asked to stop whose `GroupStopped` event is still pending.
    stopping: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Registry {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SupervisorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Adds a process in the `Stopped` state, keeping an existing record.
    pub async fn register(&self, process: &str, group: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .entry(process.to_string())
            .or_insert_with(|| ProcessRecord {
                group: group.to_string(),
                state: ProcessState::Stopped,
                pid: None,
                restarts: 0,
            });
    }

    /// Moves a process to `to`, broadcasting the transition.
    pub async fn transition(&self, process: &str, to: ProcessState, exit: Option<ExitKind>) {
        let mut inner = self.inner.lock().await;
        self.transition_locked(&mut inner, process, to, exit);
    }

    fn transition_locked(
        &self,
        inner: &mut Inner,
        process: &str,
        to: ProcessState,
        exit: Option<ExitKind>,
    ) {
        let Some(record) = inner.records.get_mut(process) else {
            return;
        };
        let from = record.state;
        record.state = to;
        if to != ProcessState::Running && to != ProcessState::Starting {
            record.pid = None;
        }
        debug!(process, %from, %to, "state change");
        self.emit(SupervisorEvent::State {
            process: process.to_string(),
            group: record.group.clone(),
            from,
            to,
            exit,
        });
    }

    /// Spawns a child unless shutdown has begun.
    ///
    /// Returns `Ok(None)` when the supervisor is shutting down; the process is
    /// left untouched in that case.
    pub async fn launch<F>(&self, process: &str, spawn: F) -> io::Result<Option<Child>>
    where
        F: FnOnce() -> io::Result<Child>,
    {
        let mut inner = self.inner.lock().await;
        if inner.shutting_down {
            return Ok(None);
        }
        self.transition_locked(&mut inner, process, ProcessState::Starting, None);
        let child = spawn()?;
        if let Some(record) = inner.records.get_mut(process) {
            record.pid = child.id();
        }
        Ok(Some(child))
    }

    /// Counts a process task of `group` as running.
    pub(crate) async fn enlist(&self, group: &str) {
        let mut inner = self.inner.lock().await;
        *inner.live.entry(group.to_string()).or_default() += 1;
    }

    /// Counts a process task of `group` as finished.
    pub(crate) async fn retire(&self, group: &str) {
        let mut inner = self.inner.lock().await;
        let remaining = match inner.live.get_mut(group) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 && inner.stopping.remove(group) {
            self.emit_group_stopped(group);
        }
    }

    /// Marks `group` as stopping; its `GroupStopped` event follows once no
    /// member task is left.
    pub(crate) async fn begin_group_stop(&self, group: &str) {
        self.inner.lock().await.stopping.insert(group.to_string());
    }

    /// Emits the pending `GroupStopped` event if the last task finished
    /// before the stop was recorded.
    pub(crate) async fn finish_group_stop(&self, group: &str) {
        let mut inner = self.inner.lock().await;
        let idle = inner.live.get(group).copied().unwrap_or(0) == 0;
        if idle && inner.stopping.remove(group) {
            self.emit_group_stopped(group);
        }
    }

    fn emit_group_stopped(&self, group: &str) {
        debug!(group, "group stopped");
        self.emit(SupervisorEvent::GroupStopped {
            group: group.to_string(),
        });
    }

    /// Counts one more restart and returns the new total.
    pub async fn note_restart(&self, process: &str) -> u32 {
        let mut inner = self.inner.lock().await;
        match inner.records.get_mut(process) {
            Some(record) => {
                record.restarts += 1;
                record.restarts
            }
            None => 0,
        }
    }

    /// Sets the shutdown flag; returns false if it was already set.
    pub async fn begin_shutdown(&self) -> bool {
        let mut inner = self.inner.lock().await;
        !std::mem::replace(&mut inner.shutting_down, true)
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.inner.lock().await.shutting_down
    }

    pub async fn state(&self, process: &str) -> Option<ProcessState> {
        self.inner
            .lock()
            .await
            .records
            .get(process)
            .map(|record| record.state)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ProcessRecord> {
        self.inner.lock().await.records.clone()
    }
}
