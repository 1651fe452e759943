use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::warn;

use crate::Cli;
use crate::command::CommandModel;
use crate::config::{self, Config};
use crate::logging::{LogContext, LogSettings};
use crate::progress;
use crate::runner::{RunSummary, Scheduler};

/// Run the model command from `cli` and return the process exit status.
pub async fn run(cli: Cli) -> Result<i32> {
    let model = CommandModel::parse(cli.command.iter().cloned());

    let (config_path, config) = load_config(&cli)?;
    let root = compute_root(&cli, config_path.as_deref())?;

    let log = LogContext::build(&LogSettings::from_command(&model, cli.quiet))
        .context("failed to initialise logging")?;
    let (progress_tx, reporter) = progress::spawn_reporter(log.dispatch().clone());

    let scheduler = Scheduler::from_config(config, &root)
        .with_log(log.clone())
        .with_progress(progress_tx);
    let interrupt = watch_interrupt(scheduler.cancel_token(), &log);

    let outcome = scheduler.launch(&model).await;
    drop(scheduler);
    interrupt.abort();
    let _ = reporter.await;

    let summary = outcome.context("invalid model command")?;
    if cli.json {
        print_summary(&summary)?;
    }
    Ok(summary.exit_status)
}

/// `--config` must exist; otherwise `batchrun.toml` under the root is used
/// when present, falling back to built-in defaults.
fn load_config(cli: &Cli) -> Result<(Option<PathBuf>, Config)> {
    if let Some(path) = &cli.config {
        let config = Config::load(path)
            .with_context(|| format!("failed to load config at {}", path.display()))?;
        return Ok((Some(path.clone()), config));
    }

    let path = match &cli.root {
        Some(root) => root.join(config::DEFAULT_CONFIG_FILE),
        None => PathBuf::from(config::DEFAULT_CONFIG_FILE),
    };
    if path.is_file() {
        let config = Config::load(&path)
            .with_context(|| format!("failed to load config at {}", path.display()))?;
        Ok((Some(path), config))
    } else {
        Ok((None, Config::default()))
    }
}

fn compute_root(cli: &Cli, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = &cli.root {
        if !root.exists() {
            anyhow::bail!("--root path does not exist: {}", root.display());
        }
        if !root.is_dir() {
            anyhow::bail!("--root must be a directory: {}", root.display());
        }
        return Ok(root.clone());
    }

    if let Some(parent) = config_path.and_then(Path::parent)
        && !parent.as_os_str().is_empty()
        && parent.exists()
    {
        return Ok(parent.to_path_buf());
    }

    std::env::current_dir().context("failed to determine current directory")
}

/// Ctrl-C stops dispatch; units already running finish on their own.
fn watch_interrupt(cancel: CancellationToken, log: &LogContext) -> JoinHandle<()> {
    let task = async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; no further work units will start");
            cancel.cancel();
        }
    };
    tokio::spawn(task.with_subscriber(log.dispatch().clone()))
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("failed to serialise run summary")?;
    println!("{json}");
    Ok(())
}
