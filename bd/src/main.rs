//! beansd - autonomous backlog execution daemon
//!
//! CLI entry point for launching and inspecting the daemon.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use beansd::backlog::{BacklogApi, CliBacklog, ListFilter};
use beansd::cli::{Cli, Command, OutputFormat};
use beansd::config::Config;
use beansd::daemon::DaemonManager;
use beansd::domain::{Item, Status};
use beansd::events::create_event_bus;
use beansd::orchestrator::Orchestrator;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("beansd")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("beansd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Start { foreground } => cmd_start(&config, foreground).await,
        Command::Stop => cmd_stop(),
        Command::Status { format } => cmd_status(format),
        Command::Queue => cmd_queue(&config).await,
        Command::Stuck => cmd_stuck(&config).await,
        Command::Cancel { id } => cmd_cancel(&config, &id).await,
        Command::RunDaemon => cmd_run_daemon(&config).await,
    }
}

async fn cmd_start(config: &Config, foreground: bool) -> Result<()> {
    config.validate()?;
    let daemon = DaemonManager::new();

    if let Some(pid) = daemon.running_pid() {
        println!("beansd is already running (PID: {})", pid);
        return Ok(());
    }

    if foreground {
        println!("Starting beansd in foreground...");
        run_daemon(config).await
    } else {
        let pid = daemon.start()?;
        println!("beansd started (PID: {})", pid);
        Ok(())
    }
}

fn cmd_stop() -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.stop()?;
    println!("beansd stopped");
    Ok(())
}

fn cmd_status(format: OutputFormat) -> Result<()> {
    let status = DaemonManager::new().status();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "running": status.running,
                "pid": status.pid,
                "version": status.version,
                "pid-file": status.pid_file,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if status.running {
                println!(
                    "{} (PID: {}, version: {})",
                    "running".green().bold(),
                    status.pid.unwrap_or(0),
                    status.version.as_deref().unwrap_or("unknown")
                );
            } else {
                println!("{}", "not running".red());
            }
        }
    }
    Ok(())
}

/// Dispatch-order sort shared by the queue view
fn sort_queue(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

async fn cmd_queue(config: &Config) -> Result<()> {
    let backlog = CliBacklog::new(config.backlog_config());
    let mut items = backlog.list(&ListFilter::with_status(Status::Todo)).await?;
    sort_queue(&mut items);

    if items.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    for item in items {
        let blockers = if item.blocking_ids.is_empty() {
            String::new()
        } else {
            format!("  (blocked by {})", item.blocking_ids.join(", ")).dimmed().to_string()
        };
        println!(
            "{:10} {:9} {}{}",
            item.id.cyan(),
            item.priority.to_string().yellow(),
            item.title,
            blockers
        );
    }
    Ok(())
}

async fn cmd_stuck(config: &Config) -> Result<()> {
    let backlog = CliBacklog::new(config.backlog_config());
    let items = backlog.list(&ListFilter::with_status(Status::InProgress)).await?;
    let stuck: Vec<Item> = items.into_iter().filter(Item::is_stuck).collect();

    if stuck.is_empty() {
        println!("Nothing is stuck");
        return Ok(());
    }

    for item in stuck {
        let kind = item.stuck_kind().map(|k| k.to_string()).unwrap_or_default();
        println!("{:10} {:8} {}", item.id.cyan(), kind.red().bold(), item.title);
    }
    Ok(())
}

/// Cancel through the store: the daemon retracts any in-flight run whose
/// item leaves in-progress, so an external status edit is the cancel path
/// for out-of-process callers.
async fn cmd_cancel(config: &Config, id: &str) -> Result<()> {
    let backlog = CliBacklog::new(config.backlog_config());

    let Some(item) = backlog.get(id).await? else {
        println!("No such item: {}", id);
        return Ok(());
    };
    if item.status != Status::InProgress {
        println!("{} is not in progress (status: {})", id, item.status);
        return Ok(());
    }

    backlog.update_status(id, Status::Todo).await?;
    println!("Cancelled {}; the daemon will terminate its agent", id);
    Ok(())
}

async fn cmd_run_daemon(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;
    run_daemon(config).await
}

/// Build and run the orchestrator until a shutdown signal arrives
async fn run_daemon(config: &Config) -> Result<()> {
    config.validate()?;
    fs::create_dir_all(&config.logs.dir).context("Failed to create output log directory")?;

    info!(version = beansd::daemon::VERSION, "beansd starting");

    let backlog: Arc<dyn BacklogApi> = Arc::new(CliBacklog::new(config.backlog_config()));
    let bus = create_event_bus();

    let orchestrator = Orchestrator::new(
        config.orchestrator_config(),
        config.scheduler_config(),
        config.watcher_config(),
        config.runner_config(),
        config.completion_config(),
        config.git_config(),
        backlog,
        bus,
    );

    let (handle, task) = orchestrator.start();

    // Graceful shutdown on ctrl-c or SIGTERM: cancel in-flight runs
    // cleanly, never file failure state
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("Shutdown signal received");
        let _ = signal_handle.stop().await;
    });

    task.await.context("Orchestrator task panicked")?
}
