mod common;

use std::time::Duration;

use common::{fast_options, wait_for_output, wait_for_state, SharedBuf};
use entryflow_core::{
    Invocation, InvocationError, ProcessState, RuntimeFlags, Startup, StartupConfig,
};
use entryflow_supervisor::{Supervisor, SupervisorEvent};

const CONFIG: &str = r#"
[project]
name = "exchange"

[readiness]
probe = ["manage", "check", "--database", "default"]
interval_secs = 0
max_attempts = 10

[[setup]]
name = "migrate"
run = ["manage", "migrate", "--noinput"]

[[setup]]
name = "docs"
run = ["manage", "build_docs"]

[[setup]]
name = "collectstatic"
run = ["manage", "collectstatic", "--noinput"]

[[setup]]
name = "fixtures"
run = ["manage", "loaddata", "default_users", "base_resources"]

[[setup]]
name = "bootstrap-data"
run = ["manage", "bootstrap"]
when = "dev-mode"

[[setup]]
name = "oauth-client"
run = ["manage", "create_oauth_client"]

[[setup]]
name = "rebuild-index"
run = ["manage", "rebuild_index", "--noinput"]

[[capabilities]]
name = "fileservice"
marker = "/nonexistent/entryflow/fileservice"
install = ["pip", "install", "fileservice"]

[[capabilities]]
name = "storyscapes"
marker = "/nonexistent/entryflow/storyscapes"
install = ["pip", "install", "storyscapes"]
"#;

#[test]
fn startup_runs_every_stage_in_order() {
    let config: StartupConfig = toml::from_str(CONFIG).unwrap();
    config.validate().unwrap();

    let mut commands = Vec::new();
    let mut probes = 0;
    let mut runner = |inv: &Invocation| -> Result<(), InvocationError> {
        commands.push(inv.args.first().cloned().unwrap_or_default());
        if inv.args.first().map(String::as_str) == Some("check") {
            probes += 1;
            if probes <= 2 {
                return Err(InvocationError::Empty);
            }
        }
        Ok(())
    };

    let handoff = Startup::new(&config, RuntimeFlags::default())
        .run(&mut runner)
        .expect("startup should succeed");

    assert_eq!(
        commands,
        vec![
            "check",
            "check",
            "check",
            "migrate",
            "build_docs",
            "collectstatic",
            "loaddata",
            "create_oauth_client",
            "rebuild_index",
        ]
    );
    assert_eq!(handoff.setup.executed.len(), 6);
    assert_eq!(handoff.setup.skipped, vec!["bootstrap-data"]);
    assert!(handoff.capabilities.is_empty());
    assert_eq!(handoff.env["ENABLED_CAPABILITIES"], "");
}

#[test]
fn dev_mode_runs_the_conditional_step() {
    let config: StartupConfig = toml::from_str(CONFIG).unwrap();
    let mut commands = Vec::new();
    let mut runner = |inv: &Invocation| -> Result<(), InvocationError> {
        commands.push(inv.command_line());
        Ok(())
    };
    let flags = RuntimeFlags {
        dev_mode: true,
        debug: false,
    };

    let handoff = Startup::new(&config, flags).run(&mut runner).unwrap();

    assert_eq!(handoff.setup.executed.len(), 7);
    assert!(handoff.setup.skipped.is_empty());
    let bootstrap = commands.iter().position(|c| c == "manage bootstrap").unwrap();
    let loaddata = commands.iter().position(|c| c.contains("loaddata")).unwrap();
    assert!(loaddata < bootstrap);
}

#[tokio::test]
async fn supervised_groups_share_one_log_and_restart_once() {
    let dir = tempfile::tempdir().unwrap();
    let config: StartupConfig = toml::from_str(&format!(
        r#"
        [project]
        name = "exchange"

        [supervisor.env]
        STATE_DIR = "{}"

        [[supervisor.groups]]
        name = "web"
        [[supervisor.groups.programs]]
        name = "waitress"
        command = ["sh", "-c", "echo serving; echo listening on 8000; exec sleep 30"]

        [[supervisor.groups]]
        name = "worker"
        [[supervisor.groups.programs]]
        name = "celery"
        command = ["sh", "-c", "if [ -e \"$STATE_DIR/crashed\" ]; then echo worker ready; exec sleep 30; fi; touch \"$STATE_DIR/crashed\"; echo worker crashing; exit 1"]
        "#,
        dir.path().display()
    ))
    .unwrap();
    config.validate().unwrap();

    let mut noop = |_: &Invocation| -> Result<(), InvocationError> { Ok(()) };
    let handoff = Startup::new(&config, RuntimeFlags::default())
        .run(&mut noop)
        .unwrap();

    let buf = SharedBuf::default();
    let mut supervisor = Supervisor::with_sink(
        handoff.groups,
        handoff.env,
        fast_options(),
        buf.clone(),
    );
    let mut events = supervisor.subscribe();
    supervisor.start().await.unwrap();

    wait_for_output(&buf, |text| {
        text.contains("[waitress] listening on 8000") && text.contains("[celery] worker ready")
    })
    .await;
    let registry = supervisor.registry().clone();
    wait_for_state(&registry, "celery", ProcessState::Running).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot["celery"].restarts, 1);
    assert_eq!(snapshot["waitress"].restarts, 0);
    assert_eq!(snapshot["waitress"].state, ProcessState::Running);

    let text = buf.contents();
    assert!(text.contains("[waitress] serving"));
    assert!(text.contains("[celery] worker crashing"));

    supervisor.shutdown().await;

    let mut celery_starts = 0;
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::State { process, to, .. } = event {
            if process == "celery" && to == ProcessState::Starting {
                celery_starts += 1;
            }
        }
    }
    assert_eq!(celery_starts, 2);
}

#[tokio::test]
async fn empty_capability_set_reaches_the_children() {
    let config: StartupConfig = toml::from_str(CONFIG).unwrap();
    let mut noop = |_: &Invocation| -> Result<(), InvocationError> { Ok(()) };
    let handoff = Startup::new(&config, RuntimeFlags::default())
        .run(&mut noop)
        .unwrap();

    let buf = SharedBuf::default();
    let group = entryflow_core::GroupSpec::new(
        "web",
        vec![entryflow_core::ProcessSpec::new(
            "caps-env",
            Invocation::new(
                "sh",
                ["-c", "echo \"caps=[${ENABLED_CAPABILITIES-unset}]\"; exec sleep 30"],
            ),
        )],
    );
    let mut supervisor =
        Supervisor::with_sink(vec![group], handoff.env, fast_options(), buf.clone());
    supervisor.start().await.unwrap();

    wait_for_output(&buf, |text| text.contains("[caps-env] caps=[]")).await;
    supervisor.shutdown().await;
}
