// Job Scheduler - retry processing and tenant reloads on fixed intervals

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info, warn};

use super::retry::{RetryScheduler, DEFAULT_BATCH_SIZE};
use crate::config::RetryConfig;
use crate::ledger::LedgerError;
use crate::pipeline::Pipeline;
use crate::services::StaticTenantDirectory;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub retry_scan_interval: Duration,
    pub retry_batch_size: usize,
    /// Re-read the tenants file on this interval; None disables the job
    pub tenant_reload_interval: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            retry_scan_interval: RetryConfig::default().scan_interval,
            retry_batch_size: DEFAULT_BATCH_SIZE,
            tenant_reload_interval: None,
        }
    }
}

impl From<&RetryConfig> for JobConfig {
    fn from(config: &RetryConfig) -> Self {
        Self {
            retry_scan_interval: config.scan_interval,
            ..Default::default()
        }
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    pipeline: Arc<Pipeline>,
    directory: Option<Arc<StaticTenantDirectory>>,
    config: JobConfig,
}

impl JobScheduler {
    pub async fn new(
        pipeline: Arc<Pipeline>,
        directory: Option<Arc<StaticTenantDirectory>>,
        config: JobConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            pipeline,
            directory,
            config,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_retry_processor().await?;
        self.schedule_tenant_reload().await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_retry_processor(&self) -> JobResult<()> {
        let interval = self.config.retry_scan_interval;
        let retry = Arc::new(RetryScheduler::new(self.pipeline.clone(), self.config.retry_batch_size));

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let retry = retry.clone();

            Box::pin(async move {
                match retry.run_once(Utc::now()).await {
                    Ok(result) if !result.errors.is_empty() => {
                        warn!("Retry processor finished with {} errors: {}", result.errors.len(), result.errors.join("; "));
                    }
                    Ok(_) => {}
                    Err(e) => error!("Retry processor failed: {}", e),
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled retry processor every {}s", interval.as_secs());

        Ok(())
    }

    async fn schedule_tenant_reload(&self) -> JobResult<()> {
        let (Some(interval), Some(directory)) = (self.config.tenant_reload_interval, self.directory.clone()) else {
            return Ok(());
        };

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let directory = directory.clone();

            Box::pin(async move {
                if let Err(e) = directory.reload().await {
                    warn!("Tenant reload failed, keeping previous configuration: {}", e);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled tenant reload every {}s", interval.as_secs());

        Ok(())
    }
}
