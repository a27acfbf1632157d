#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use entryflow_core::{Invocation, ProcessSpec, ProcessState};
use entryflow_supervisor::{Registry, SupervisorOptions};

/// In-memory log sink shared with the test body.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn sh(name: &str, script: &str) -> ProcessSpec {
    ProcessSpec::new(name, Invocation::new("sh", ["-c", script]))
}

pub fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        restart_backoff: Duration::from_millis(200),
        grace: Duration::from_secs(2),
        ..SupervisorOptions::default()
    }
}

/// Polls the registry until `process` reaches `state`.
pub async fn wait_for_state(registry: &Registry, process: &str, state: ProcessState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if registry.state(process).await == Some(state) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "{process} never reached {state}; snapshot: {:?}",
                registry.snapshot().await
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Polls `check` against the sink contents until it holds.
pub async fn wait_for_output<F>(buf: &SharedBuf, check: F)
where
    F: Fn(&str) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let text = buf.contents();
        if check(&text) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected output never appeared; got:\n{text}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
