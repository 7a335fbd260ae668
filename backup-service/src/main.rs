//! Backup Service - scheduler daemon and operator commands.

use anyhow::Context;
use backup_engine::model::RecordFilter;
use backup_engine::utils::logger;
use backup_engine::{BackupStatus, BackupType, Config, RestoreRequest};
use backup_service::config::AppConfig;
use backup_service::services::backup_scheduler::BackupScheduler;
use backup_service::state::AppState;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (overrides CONFIG_FILE)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cron scheduler until SIGINT or SIGTERM
    Run,

    /// Take a backup now
    Backup {
        #[command(subcommand)]
        kind: BackupKind,
    },

    /// Restore tables from a completed backup
    Restore {
        backup_id: String,

        /// Comma-separated subset of tables (default: every table in the backup)
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,

        /// Report what would be restored without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check a stored backup without touching any table
    Verify { backup_id: String },

    /// Apply the retention policy now
    Prune,

    /// List backup records, oldest first
    List {
        #[arg(long = "type", value_name = "full|incremental")]
        backup_type: Option<String>,

        #[arg(long, value_name = "completed|failed")]
        status: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum BackupKind {
    Full,
    /// Changed rows only; defaults to everything since the last completed backup
    Incremental {
        /// RFC 3339 instant, e.g. 2024-06-01T00:00:00Z
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut app_config = AppConfig::from_env();
    if let Some(path) = args.config {
        app_config.config_file = path;
    }

    let engine_config = Config::from_file(&app_config.config_file).with_context(|| {
        format!("loading engine config from {}", app_config.config_file.display())
    })?;

    let log_level = args
        .log_level
        .or_else(|| app_config.log_level.clone())
        .unwrap_or_else(|| engine_config.log.level.clone());
    logger::init(&log_level)?;

    tracing::info!(
        "Starting backup-service v{} ({} tables)",
        env!("CARGO_PKG_VERSION"),
        engine_config.tables.len()
    );

    let state = Arc::new(AppState::build(app_config, engine_config)?);
    let result = dispatch(args.command, &state).await;
    state.close();
    result
}

async fn dispatch(command: Command, state: &Arc<AppState>) -> anyhow::Result<()> {
    let service = &state.service;

    match command {
        Command::Run => run_daemon(state.clone()).await,
        Command::Backup { kind } => {
            let ctx = state.call_context();
            service.validate_schema(&ctx).await?;
            let record = match kind {
                BackupKind::Full => service.create_full_backup(&ctx).await?,
                BackupKind::Incremental { since: Some(since) } => {
                    service.create_incremental_backup(since, &ctx).await?
                }
                BackupKind::Incremental { since: None } => {
                    service.create_incremental_since_last(&ctx).await?
                }
            };
            print_json(&record)
        }
        Command::Restore {
            backup_id,
            tables,
            dry_run,
        } => {
            let mut request = RestoreRequest::new(backup_id).dry_run(dry_run);
            if let Some(tables) = tables {
                request = request.tables(tables);
            }
            let outcome = service
                .restore_from_backup(&request, &state.call_context())
                .await?;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!("restore finished with {} table error(s)", outcome.errors.len());
            }
            Ok(())
        }
        Command::Verify { backup_id } => {
            let report = service.verify_backup(&backup_id, &state.call_context()).await?;
            print_json(&report)?;
            if !report.valid {
                anyhow::bail!("backup {backup_id} failed verification");
            }
            Ok(())
        }
        Command::Prune => {
            let report = service.clean_old_backups(&state.call_context()).await?;
            print_json(&report)
        }
        Command::List { backup_type, status } => {
            let filter = RecordFilter {
                backup_type: backup_type.as_deref().map(str::parse::<BackupType>).transpose()?,
                status: status.as_deref().map(str::parse::<BackupStatus>).transpose()?,
                ..Default::default()
            };
            let records = service.list_backups(&filter, &state.call_context()).await?;
            print_json(&records)
        }
    }
}

async fn run_daemon(state: Arc<AppState>) -> anyhow::Result<()> {
    // A missing change column breaks every incremental run; refuse to start.
    state.service.validate_schema(&state.call_context()).await?;

    let scheduler = BackupScheduler::new(state.clone()).await?;
    scheduler.init_schedules().await?;
    scheduler.start().await?;
    tracing::info!("Scheduler running");

    shutdown_signal(state.cancel.clone()).await;

    tracing::info!("Shutting down...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    tracing::info!("Service stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
