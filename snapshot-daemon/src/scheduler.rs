use chrono::{Local, NaiveTime, Timelike};
use snapshot_engine::{BackupOrchestrator, BackupReport};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Triggers `backup_all` once a day at a fixed local time
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    orchestrator: BackupOrchestrator,
    running: Arc<Mutex<bool>>,
}

impl BackupScheduler {
    pub async fn new(orchestrator: BackupOrchestrator) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            orchestrator,
            running: Arc::new(Mutex::new(false)),
        })
    }

    pub async fn schedule_daily(&self, at: NaiveTime) -> anyhow::Result<()> {
        let cron_expression = daily_cron_expression(at);
        let orchestrator = self.orchestrator.clone();
        let running = self.running.clone();

        let job = Job::new_async_tz(cron_expression.as_str(), Local, move |_uuid, _lock| {
            let orchestrator = orchestrator.clone();
            let running = running.clone();
            Box::pin(async move {
                tracing::info!("Starting scheduled backup");
                run_exclusive(&orchestrator, &running).await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Daily backup scheduled at {}", at.format("%H:%M"));
        Ok(())
    }

    /// Run a backup immediately unless one is already in progress
    pub async fn run_now(&self) -> Option<BackupReport> {
        run_exclusive(&self.orchestrator, &self.running).await
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

async fn run_exclusive(
    orchestrator: &BackupOrchestrator,
    running: &Mutex<bool>,
) -> Option<BackupReport> {
    {
        let mut busy = running.lock().await;
        if *busy {
            tracing::warn!("Skipping backup run: previous run still in progress");
            return None;
        }
        *busy = true;
    }

    let report = orchestrator.backup_all().await;

    *running.lock().await = false;
    Some(report)
}

/// Six-field cron expression (with seconds) firing daily at `at`
pub fn daily_cron_expression(at: NaiveTime) -> String {
    format!("0 {} {} * * *", at.minute(), at.hour())
}
