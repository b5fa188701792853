//! Paydirt Background Worker
//!
//! Handles scheduled jobs:
//! - Promo expiration sweep (hourly)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use paydirt_billing::BillingService;
use paydirt_shared::create_pool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Paydirt Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;

    let billing = Arc::new(BillingService::from_env(pool)?);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Promo expiration sweep (hourly at :07)
    // Safe at any cadence: ending a promo is idempotent per row, so an
    // overlapping manual trigger from the admin API cannot double-notify.
    let sweeper = billing.sweeper.clone();
    scheduler
        .add(Job::new_async("0 7 * * * *", move |_uuid, _l| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                info!("Running scheduled promo expiration sweep");
                match sweeper.sweep(OffsetDateTime::now_utc()).await {
                    Ok(summary) => {
                        info!(
                            scanned = summary.scanned,
                            transitioned = summary.transitioned,
                            failed = summary.failed,
                            "Scheduled promo sweep complete"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Scheduled promo sweep failed");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: Promo expiration sweep (hourly)");

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Paydirt Worker started successfully with 2 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
