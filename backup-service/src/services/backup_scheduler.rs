use crate::state::AppState;
use backup_engine::EngineError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTask {
    FullBackup,
    IncrementalBackup,
    Prune,
}

impl fmt::Display for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScheduledTask::FullBackup => "full-backup",
            ScheduledTask::IncrementalBackup => "incremental-backup",
            ScheduledTask::Prune => "prune",
        })
    }
}

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    pub async fn schedule(&self, task: ScheduledTask, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                if state.cancel.is_cancelled() {
                    return;
                }
                run_task(&state, task).await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(task = %task, cron = %cron_expression, "Task scheduled");
        Ok(())
    }

    /// Register the three recurring tasks. An empty expression disables one.
    pub async fn init_schedules(&self) -> anyhow::Result<()> {
        let config = &self.state.config;
        let tasks = [
            (ScheduledTask::FullBackup, config.full_backup_cron.clone()),
            (ScheduledTask::IncrementalBackup, config.incremental_backup_cron.clone()),
            (ScheduledTask::Prune, config.prune_cron.clone()),
        ];

        let mut count = 0;
        for (task, cron) in tasks {
            if cron.trim().is_empty() {
                tracing::info!(task = %task, "Task disabled");
                continue;
            }
            if let Err(e) = self.schedule(task, &cron).await {
                tracing::error!(task = %task, cron = %cron, error = %e, "Failed to schedule task");
            } else {
                count += 1;
            }
        }

        tracing::info!(count, "Cron schedules initialized");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Run one task to completion, logging its result. Overlapping runs of the
/// same task are skipped.
pub async fn run_task(state: &AppState, task: ScheduledTask) {
    let ctx = state.call_context();
    tracing::info!(task = %task, "Starting scheduled task");

    let result = match task {
        ScheduledTask::FullBackup => state.service.create_full_backup(&ctx).await.map(|record| {
            tracing::info!(task = %task, backup_id = %record.id, size = record.size_bytes, "Scheduled backup completed");
        }),
        ScheduledTask::IncrementalBackup => state
            .service
            .create_incremental_since_last(&ctx)
            .await
            .map(|record| {
                tracing::info!(task = %task, backup_id = %record.id, tables = ?record.tables, "Scheduled backup completed");
            }),
        ScheduledTask::Prune => state.service.clean_old_backups(&ctx).await.map(|report| {
            if report.errors.is_empty() {
                tracing::info!(task = %task, deleted = report.deleted, kept = report.kept, "Prune completed");
            } else {
                tracing::warn!(task = %task, deleted = report.deleted, errors = ?report.errors, "Prune completed with errors");
            }
        }),
    };

    match result {
        Ok(()) => {}
        Err(EngineError::AlreadyRunning(_)) => {
            tracing::warn!(task = %task, "Skipping scheduled run: task already running");
        }
        Err(e) => tracing::error!(task = %task, error = %e, "Scheduled task failed"),
    }
}
