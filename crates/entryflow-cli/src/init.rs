use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use entryflow_core::StartupConfig;
use tracing::{info, instrument};

use crate::Cli;

const DEFAULT_PROJECT: &str = "exchange";

/// Runs the `init` stage, writing a starter `entryflow.toml`.
///
/// The selector, when given, becomes the project name.
#[instrument(skip(cli))]
pub fn run(cli: &Cli, project: Option<&str>) -> Result<()> {
    let project = project.unwrap_or(DEFAULT_PROJECT);
    let content = render_config(project);

    if cli.stdout {
        println!("{content}");
        return Ok(());
    }

    write_if_absent(&cli.config, &content, cli.force)
        .with_context(|| format!("failed to write '{}'", cli.config))?;
    StartupConfig::load_from_file(&cli.config)?;

    info!(project, config = %cli.config, "init complete");
    println!("next: run 'entryflow plan' to review the startup sequence");
    Ok(())
}

/// A complete configuration for a `manage.py` application served by
/// waitress with a celery worker.
pub(crate) fn render_config(project: &str) -> String {
    format!(
        r#"[project]
name = "{project}"
root = "/code"

[readiness]
probe = ["python", "manage.py", "check", "--database", "default"]
interval_secs = 5
# 0 waits forever
max_attempts = 60

[[setup]]
name = "migrate"
run = ["python", "manage.py", "migrate", "--noinput"]

[[setup]]
name = "docs"
run = ["python", "manage.py", "build_docs"]

[[setup]]
name = "collectstatic"
run = ["python", "manage.py", "collectstatic", "--noinput"]

[[setup]]
name = "fixtures"
run = ["python", "manage.py", "loaddata", "default_users", "base_resources"]

[[setup]]
name = "bootstrap-data"
run = ["python", "manage.py", "loaddata", "dev_bootstrap"]
when = "dev-mode"

[[setup]]
name = "oauth-client"
run = ["python", "manage.py", "create_oauth_client"]

[[setup]]
name = "rebuild-index"
run = ["python", "manage.py", "rebuild_index", "--noinput"]

[[capabilities]]
name = "fileservice"
marker = "/mnt/plugins/fileservice/setup.py"
install = ["pip", "install", "/mnt/plugins/fileservice"]

[[capabilities]]
name = "storyscapes"
marker = "/mnt/plugins/storyscapes/setup.py"
install = ["pip", "install", "/mnt/plugins/storyscapes"]
load = [["python", "manage.py", "loaddata", "storyscapes_defaults"]]

# linked only when DEV_MODE is set
[[overlays]]
source = "/mnt/maploom/index.html"
target = "/code/templates/maploom.html"

[supervisor]
grace_secs = 10
restart_backoff_secs = 5

[supervisor.env]
PYTHONUNBUFFERED = "1"

[[supervisor.groups]]
name = "web"

[[supervisor.groups.programs]]
name = "waitress"
command = ["waitress-serve", "--port=8000", "{project}.wsgi:application"]

[[supervisor.groups]]
name = "worker"

[[supervisor.groups.programs]]
name = "celery"
command = ["celery", "worker", "--app={project}", "--loglevel=info"]
"#
    )
}

fn write_if_absent(path: &str, content: &str, force: bool) -> Result<()> {
    let output = Path::new(path);

    if output.exists() && !force {
        return Err(anyhow!(
            "'{}' already exists. Re-run with --force to overwrite",
            path
        ));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory '{}'", parent.display()))?;
    }

    fs::write(output, content)
        .with_context(|| format!("failed to write file '{}'", output.display()))
}
