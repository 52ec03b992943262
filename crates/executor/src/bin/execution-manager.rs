//! execution-manager — standalone host for the network-monitor scheduler.
//!
//! Loads configuration from a TOML file or the environment, starts the
//! recurring auto-scan loop when enabled, and logs metrics periodically
//! until SIGINT/SIGTERM. On shutdown the executor is disconnected, which
//! cancels every tracked task.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use clap::Parser;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{info, warn};

use netwatch_core::config::load_dotenv;
use netwatch_core::Config;
use netwatch_executor::{CancellationToken, ExecutionManager, Task, TaskContext, TaskError};

// ── CLI ─────────────────────────────────────────────────────────────

/// Execution manager: priority scheduler with a reserved immediate lane.
#[derive(Parser, Debug)]
#[command(name = "execution-manager", version, about)]
struct Cli {
    /// Path to a TOML config file. Without it, config comes from the environment.
    #[arg(long, env = "NETWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override `executor.max_workers` (0 = available parallelism).
    #[arg(long)]
    max_workers: Option<usize>,

    /// Override `auto_scan.interval_secs`; also enables auto-scan.
    #[arg(long)]
    auto_scan_interval: Option<u64>,

    /// Override `auto_scan.command`.
    #[arg(long)]
    scan_command: Option<String>,

    /// Metrics logging interval in seconds (0 = disabled).
    #[arg(long, env = "EXECUTOR_METRICS_INTERVAL", default_value_t = 30)]
    metrics_interval: u64,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::from_env(),
        };
        if let Some(n) = self.max_workers {
            config.executor.max_workers = n;
        }
        if let Some(secs) = self.auto_scan_interval {
            config.auto_scan.enabled = true;
            config.auto_scan.interval_secs = secs;
        }
        if let Some(cmd) = &self.scan_command {
            config.auto_scan.command = Some(cmd.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

// ── Auto-scan body ──────────────────────────────────────────────────

/// Build one auto-scan cycle that runs `command` through the shell.
fn scan_task(command: String, priority: i32) -> Task {
    let context = TaskContext::new()
        .with_target(command.clone())
        .with_label("source", "auto-scan");
    Task::scan(move |token| run_command(command, token))
        .with_priority(priority)
        .with_context(context)
}

async fn run_command(command: String, token: CancellationToken) -> Result<(), TaskError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TaskError::failed(format!("failed to spawn `{}`: {}", command, e)))?;

    tokio::select! {
        _ = token.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill cancelled scan command");
            }
            Err(TaskError::Cancelled)
        }
        status = child.wait() => {
            let status = status.map_err(anyhow::Error::from)?;
            if status.success() {
                Ok(())
            } else {
                Err(TaskError::failed(format!("`{}` exited with {}", command, status)))
            }
        }
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    info!(?cli, "starting execution-manager");

    let config = cli.load_config()?;
    config.log_summary();

    let manager = ExecutionManager::from_config(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let auto_scan = &config.auto_scan;
    let auto_scan_loop = match (auto_scan.enabled, auto_scan.command.clone()) {
        (true, Some(command)) => {
            let priority = auto_scan.priority;
            Some(manager.spawn_auto_scan_loop(
                auto_scan.interval(),
                move || scan_task(command.clone(), priority),
                shutdown_rx.clone(),
            ))
        }
        (true, None) => {
            warn!("auto-scan enabled without a command; loop not started");
            None
        }
        (false, _) => None,
    };

    // Periodic metrics reporter.
    let metrics_interval = cli.metrics_interval;
    if metrics_interval > 0 {
        let manager = manager.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let metrics = manager.metrics();
                let listing = manager.list_tasks();
                info!(
                    submitted = metrics.submitted,
                    completed = metrics.completed,
                    failed = metrics.failed,
                    cancelled = metrics.cancelled,
                    running = listing.running.len(),
                    queued = listing.queued.len(),
                    reserved_busy = listing.reserved_slot.busy,
                    "executor metrics"
                );
            }
        });
    }

    shutdown_signal().await;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = auto_scan_loop {
        let _ = handle.await;
    }
    manager.disconnect();

    let metrics = manager.metrics();
    info!(
        metrics = %serde_json::to_string(&metrics)?,
        "execution-manager stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
