//! ComplyKit Background Worker
//!
//! Handles scheduled jobs:
//! - Usage threshold sweep across active subscribers (hourly)
//! - Billing invariant checks (daily at 5:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use complykit_billing::BillingService;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

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

    info!("Starting ComplyKit Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Create billing service
    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // If Stripe isn't configured, run in minimal mode
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            info!("Worker running without Stripe integration");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Usage threshold sweep (hourly at minute 10)
    // Warns subscribers approaching their entity or storage quota; alerts
    // are de-duplicated over a 24-hour window so the hourly cadence never
    // repeats a warning.
    let alerts_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 10 * * * *", move |_uuid, _l| {
            let billing = alerts_billing.clone();
            Box::pin(async move {
                info!("Running usage threshold sweep");
                match billing.alerts.sweep().await {
                    Ok(summary) => info!(
                        checked = summary.checked,
                        alerted = summary.alerted,
                        errors = summary.errors,
                        "Usage threshold sweep finished"
                    ),
                    Err(e) => error!(error = %e, "Usage threshold sweep failed to start"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Usage threshold sweep (hourly)");

    // Job 2: Billing invariant checks (daily at 5:00 AM UTC)
    let invariants_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 5 * * *", move |_uuid, _l| {
            let billing = invariants_billing.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                match billing.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(checks_run = summary.checks_run, "All billing invariants hold")
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            error!(
                                invariant = %violation.invariant,
                                severity = ?violation.severity,
                                affected = violation.user_ids.len(),
                                "{}",
                                violation.description
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant check run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing invariant checks (daily 05:00 UTC)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    scheduler.start().await?;
    info!("Worker scheduler started");

    // Keep the worker alive
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
