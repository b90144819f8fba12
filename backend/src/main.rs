use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod ledger;
mod pipeline;
mod redaction;
mod resolver;
mod services;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use jobs::{JobConfig, JobScheduler};
use ledger::{BackoffPolicy, EventLedger, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use pipeline::Pipeline;
use redaction::Redactor;
use services::{
    ActivityLog, EmailNotifier, HttpCrmClient, MemoryActivityLog, PgActivityLog, StaticTenantDirectory,
};
use workflows::{ActionDispatcher, DispatchTimeouts};

/// `DATABASE_URL=memory` runs without Postgres
const MEMORY_DATABASE: &str = "memory";

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub db_pool: Option<sqlx::PgPool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let redactor = Arc::new(Redactor::new(&config.redact_fields));

    let (ledger_store, activity, db_pool): (Arc<dyn LedgerStore>, Arc<dyn ActivityLog>, _) =
        if config.database_url == MEMORY_DATABASE {
            tracing::warn!("DATABASE_URL=memory: ledger and activity log are not persisted");
            (Arc::new(MemoryLedgerStore::new()), Arc::new(MemoryActivityLog::new()), None)
        } else {
            let pool = database::create_pool(&config.database_url, database::PoolConfig::from_env()).await?;
            database::migrate(&pool).await?;
            (
                Arc::new(PgLedgerStore::new(pool.clone())),
                Arc::new(PgActivityLog::new(pool.clone())),
                Some(pool),
            )
        };

    let directory = Arc::new(StaticTenantDirectory::from_file(&config.tenants_file).await?);

    if !config.crm.is_configured() {
        tracing::warn!("CRM_BASE_URL or CRM_ACCESS_TOKEN not set; record lookups will fail");
    }
    let crm = Arc::new(HttpCrmClient::new(&config.crm)?);
    if !config.smtp.is_configured() {
        tracing::warn!("SMTP credentials not set; notifications go through an unauthenticated relay");
    }
    let notifier = Arc::new(EmailNotifier::new(&config.smtp));

    let dispatcher = ActionDispatcher::new(
        crm.clone(),
        notifier,
        activity,
        DispatchTimeouts::from(&config.pipeline),
        redactor.clone(),
    );
    let ledger = EventLedger::new(ledger_store, BackoffPolicy::from(config.retry.clone()));
    let pipeline = Arc::new(Pipeline::new(
        directory.clone(),
        ledger,
        crm,
        dispatcher,
        config.pipeline.clone(),
        redactor,
    ));

    let mut scheduler = JobScheduler::new(
        pipeline.clone(),
        Some(directory),
        JobConfig {
            tenant_reload_interval: config.tenant_reload_interval,
            ..JobConfig::from(&config.retry)
        },
    )
    .await?;
    scheduler.start().await?;

    let app = handlers::router(Arc::new(AppState { pipeline, db_pool }));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}
