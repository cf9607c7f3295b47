//! Usage threshold monitoring
//!
//! Periodic sweep over all active subscribers: compute utilization against
//! plan quotas and raise a de-duplicated warning when a metric crosses the
//! threshold. A batch job where partial success is the normal outcome; one
//! subscriber's failure never aborts the sweep for the rest.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::error::BillingResult;
use crate::notify::NotificationService;
use crate::usage::UsageService;

/// Warn at or above this share of quota
const WARN_THRESHOLD_PERCENT: f64 = 90.0;

/// Sliding dedup window for repeat alerts
const DEDUP_WINDOW_HOURS: i32 = 24;

/// Metric a usage alert refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMetric {
    Entities,
    Storage,
}

impl AlertMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub alerted: usize,
    pub errors: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveSubscriberRow {
    user_id: Uuid,
    email: String,
    tier: String,
}

/// Sweeps subscribers for quota-threshold warnings
pub struct UsageAlertService {
    pool: PgPool,
    catalog: PlanCatalog,
    notifier: NotificationService,
}

impl UsageAlertService {
    pub fn new(pool: PgPool, catalog: PlanCatalog, notifier: NotificationService) -> Self {
        Self {
            pool,
            catalog,
            notifier,
        }
    }

    /// Check every active subscriber and alert on threshold crossings
    pub async fn sweep(&self) -> BillingResult<SweepSummary> {
        let subscribers: Vec<ActiveSubscriberRow> =
            sqlx::query_as("SELECT user_id, email, tier FROM subscribers WHERE subscribed = TRUE")
                .fetch_all(&self.pool)
                .await?;

        let mut summary = SweepSummary::default();

        for subscriber in subscribers {
            summary.checked += 1;
            match self.check_subscriber(&subscriber).await {
                Ok(alerted) => summary.alerted += alerted,
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(
                        user_id = %subscriber.user_id,
                        error = %e,
                        "Usage threshold check failed for subscriber"
                    );
                }
            }
        }

        tracing::info!(
            checked = summary.checked,
            alerted = summary.alerted,
            errors = summary.errors,
            "Usage threshold sweep complete"
        );

        Ok(summary)
    }

    async fn check_subscriber(&self, subscriber: &ActiveSubscriberRow) -> BillingResult<usize> {
        let plan = self.catalog.plan_for(Some(&subscriber.tier));
        let snapshot = UsageService::new(self.pool.clone())
            .snapshot(subscriber.user_id)
            .await?;

        let mut alerted = 0;

        let entities_pct = utilization_percent(snapshot.entities_used as f64, plan.entity_quota);
        if at_threshold(entities_pct)
            && self
                .raise_alert(
                    subscriber,
                    AlertMetric::Entities,
                    entities_pct,
                    &format!(
                        "You are using {} of {} entities on the {} plan.",
                        snapshot.entities_used, plan.entity_quota, plan.tier
                    ),
                )
                .await?
        {
            alerted += 1;
        }

        let storage_pct = utilization_percent(snapshot.storage_used_mb, plan.storage_quota_mb);
        if at_threshold(storage_pct)
            && self
                .raise_alert(
                    subscriber,
                    AlertMetric::Storage,
                    storage_pct,
                    &format!(
                        "Your document storage is at {:.0}% of the {} plan allowance.",
                        storage_pct, plan.tier
                    ),
                )
                .await?
        {
            alerted += 1;
        }

        Ok(alerted)
    }

    /// Insert a deduplicated alert; returns whether a new alert was raised
    ///
    /// Check-then-insert over the sliding window, with the day-bucket unique
    /// constraint turning the remaining race into a silent no-op instead of
    /// a duplicate row.
    async fn raise_alert(
        &self,
        subscriber: &ActiveSubscriberRow,
        metric: AlertMetric,
        percent: f64,
        message: &str,
    ) -> BillingResult<bool> {
        let (recent,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM usage_alerts
                WHERE user_id = $1
                  AND metric_type = $2
                  AND created_at > NOW() - make_interval(hours => $3)
            )
            "#,
        )
        .bind(subscriber.user_id)
        .bind(metric.as_str())
        .bind(DEDUP_WINDOW_HOURS)
        .fetch_one(&self.pool)
        .await?;

        if recent {
            return Ok(false);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO usage_alerts (user_id, metric_type, day_bucket, created_at)
            VALUES ($1, $2, CURRENT_DATE, NOW())
            ON CONFLICT (user_id, metric_type, day_bucket) DO NOTHING
            "#,
        )
        .bind(subscriber.user_id)
        .bind(metric.as_str())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            // A concurrent sweep won the race; their alert stands.
            return Ok(false);
        }

        tracing::warn!(
            user_id = %subscriber.user_id,
            metric = %metric,
            percent = percent,
            "Usage threshold alert raised"
        );

        self.notifier
            .notify_user(
                subscriber.user_id,
                &subscriber.email,
                "usage_threshold",
                "Approaching your plan limit",
                message,
            )
            .await?;

        Ok(true)
    }
}

/// Utilization as a percentage; unbounded quotas report zero
pub fn utilization_percent(used: f64, quota: i64) -> f64 {
    if quota <= 0 || quota == i64::MAX {
        return 0.0;
    }
    used / quota as f64 * 100.0
}

/// Whether a utilization percentage is at or above the warn threshold
pub fn at_threshold(percent: f64) -> bool {
    percent >= WARN_THRESHOLD_PERCENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_trips_at_ninety_percent() {
        assert!(!at_threshold(utilization_percent(17.0, 20)));
        assert!(at_threshold(utilization_percent(18.0, 20)));
        assert!(at_threshold(utilization_percent(20.0, 20)));
        // Overshoot past quota still alerts
        assert!(at_threshold(utilization_percent(25.0, 20)));
    }

    #[test]
    fn starter_boundary() {
        // 3 of 4 is 75%, 4 of 4 is 100%
        assert!(!at_threshold(utilization_percent(3.0, 4)));
        assert!(at_threshold(utilization_percent(4.0, 4)));
    }

    #[test]
    fn unbounded_quota_never_alerts() {
        assert_eq!(utilization_percent(1_000_000.0, i64::MAX), 0.0);
        assert_eq!(utilization_percent(5.0, 0), 0.0);
    }
}
