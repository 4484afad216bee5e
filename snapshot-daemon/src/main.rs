//! Snapshot daemon - Main entry point
//!
//! Runs the snapshot engine once at startup and then daily at the configured
//! time, until SIGINT/SIGTERM.

mod config;
mod scheduler;

use crate::scheduler::BackupScheduler;
use clap::{Parser, Subcommand};
use snapshot_engine::{notify, utils, BackupOrchestrator, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: ./snapshot.toml if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Back up now (if configured) and then every day at the scheduled time
    Run,
    /// Run a single backup and exit
    Once,
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration, including environment overrides
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command.clone().unwrap_or(Command::Run);

    match command {
        Command::InitConfig { force } => {
            let path = args
                .config
                .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
            return init_config(&path, force);
        }
        Command::ShowConfig => {
            let config = config::load(args.config.as_deref())?;
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Command::Run | Command::Once => {}
    }

    let config = config::load(args.config.as_deref())?;
    config.validate()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, Some(&config.log.file))?;

    tracing::info!("Starting snapshot-daemon v{}", env!("CARGO_PKG_VERSION"));
    log_settings(&config);

    let notifier = notify::from_config(&config.notify);
    let config = Arc::new(config);
    let orchestrator = BackupOrchestrator::new(config.clone(), notifier);

    match command {
        Command::Once => {
            orchestrator.backup_all().await;
            Ok(())
        }
        _ => run_daemon(orchestrator, &config).await,
    }
}

async fn run_daemon(orchestrator: BackupOrchestrator, config: &Config) -> anyhow::Result<()> {
    let scheduler = Arc::new(BackupScheduler::new(orchestrator).await?);
    scheduler.schedule_daily(config.schedule.daily_time()?).await?;
    scheduler.start().await?;

    let cancel = CancellationToken::new();

    if config.schedule.run_on_start {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = scheduler.run_now() => {}
                _ = cancel.cancelled() => {}
            }
        });
    }

    tracing::info!("Snapshot daemon running, waiting for schedule");

    shutdown_signal(cancel).await;

    tracing::info!("Shutting down...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    tracing::info!("Daemon stopped");

    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, Config::default().to_toml()?)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn log_settings(config: &Config) {
    let backup = &config.backup;
    tracing::info!("Mapped drives: {:?}", backup.mapped_drives);
    tracing::info!("Destination bases: {:?}", backup.destination_bases);
    tracing::info!("Log file: {}", config.log.file.display());
    tracing::info!(
        "Max depth: {}, max backup age: {} day(s), max threads: {}, parallel drives: {}",
        backup.max_depth,
        backup.max_backup_age_days,
        backup.max_threads,
        backup.max_parallel_drives
    );
    if !backup.exclude_extensions.is_empty() {
        tracing::info!("Excluded extensions: {:?}", backup.exclude_extensions);
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
