//! Billing invariant checks
//!
//! Runnable consistency checks over subscription state. Each check is a
//! plain read; violations carry enough context to debug from the report
//! alone. The worker runs the full set daily and operators can trigger it
//! on demand after a webhook replay or manual data fix.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::error::BillingResult;

/// A single invariant violation
#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub user_ids: Vec<Uuid>,
    pub description: String,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationSeverity {
    /// Entitlements may be wrong right now
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Should investigate
    Medium,
    /// Informational
    Low,
}

/// Summary of one full check run
#[derive(Debug, Clone, Serialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct SubscribedRow {
    user_id: Uuid,
    tier: String,
    entities_limit: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingCustomerRow {
    user_id: Uuid,
    email: String,
}

#[derive(Debug, sqlx::FromRow)]
struct StalePendingRow {
    user_id: Uuid,
    updated_at: OffsetDateTime,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
    catalog: PlanCatalog,
}

impl InvariantChecker {
    pub fn new(pool: PgPool, catalog: PlanCatalog) -> Self {
        Self { pool, catalog }
    }

    /// Run all checks and summarize
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let mut violations = Vec::new();

        violations.extend(self.check_subscribed_tier_known().await?);
        violations.extend(self.check_entities_limit_matches_catalog().await?);
        violations.extend(self.check_subscribed_has_customer().await?);
        violations.extend(self.check_stale_pending_rows().await?);

        let healthy = violations.is_empty();
        Ok(InvariantCheckSummary {
            checked_at: OffsetDateTime::now_utc(),
            checks_run: 4,
            violations,
            healthy,
        })
    }

    /// `subscribed = true` implies the tier exists in the catalog
    async fn check_subscribed_tier_known(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SubscribedRow> = sqlx::query_as(
            "SELECT user_id, tier, entities_limit FROM subscribers WHERE subscribed = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;

        let offenders: Vec<Uuid> = rows
            .iter()
            .filter(|r| r.tier.parse::<complykit_shared::SubscriptionTier>().is_err())
            .map(|r| r.user_id)
            .collect();

        if offenders.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "subscribed_tier_known".to_string(),
            description: format!(
                "{} active subscriber(s) carry a tier the catalog does not define; \
                 enforcement is failing closed to starter for them",
                offenders.len()
            ),
            user_ids: offenders,
            severity: ViolationSeverity::Critical,
        }])
    }

    /// Denormalized `entities_limit` equals the catalog quota for the tier
    async fn check_entities_limit_matches_catalog(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SubscribedRow> = sqlx::query_as(
            "SELECT user_id, tier, entities_limit FROM subscribers WHERE subscribed = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;

        let offenders: Vec<Uuid> = rows
            .iter()
            .filter(|r| {
                // Unknown tiers are reported by the check above
                r.tier
                    .parse::<complykit_shared::SubscriptionTier>()
                    .is_ok_and(|tier| self.catalog.plan(tier).entity_quota != r.entities_limit)
            })
            .map(|r| r.user_id)
            .collect();

        if offenders.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "entities_limit_matches_catalog".to_string(),
            description: format!(
                "{} subscriber(s) have a cached entities_limit that disagrees with the \
                 plan catalog; reads are unaffected (the catalog wins) but the cache \
                 should be rewritten",
                offenders.len()
            ),
            user_ids: offenders,
            severity: ViolationSeverity::High,
        }])
    }

    /// Active subscribers should have a Stripe customer on file
    async fn check_subscribed_has_customer(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingCustomerRow> = sqlx::query_as(
            r#"
            SELECT user_id, email FROM subscribers
            WHERE subscribed = TRUE AND stripe_customer_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "subscribed_has_customer".to_string(),
            description: format!(
                "{} active subscriber(s) have no Stripe customer id; renewal invoices \
                 cannot be correlated to them",
                rows.len()
            ),
            user_ids: rows.into_iter().map(|r| r.user_id).collect(),
            severity: ViolationSeverity::Medium,
        }])
    }

    /// Pending rows older than a day mean an abandoned or lost checkout
    async fn check_stale_pending_rows(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StalePendingRow> = sqlx::query_as(
            r#"
            SELECT user_id, updated_at FROM subscribers
            WHERE status = 'pending' AND updated_at < NOW() - INTERVAL '24 hours'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "no_stale_pending_rows".to_string(),
            description: format!(
                "{} checkout(s) have sat pending for over 24 hours; either the user \
                 abandoned checkout or a completion webhook was never delivered",
                rows.len()
            ),
            user_ids: rows.into_iter().map(|r| r.user_id).collect(),
            severity: ViolationSeverity::Low,
        }])
    }
}
