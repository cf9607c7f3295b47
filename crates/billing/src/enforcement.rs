//! Server-side entitlement enforcement
//!
//! Read-only guards consulted before any entity-mutating action. The client
//! runs the same evaluation for optimistic UI gating, but only this
//! server-side check is authoritative; the client's environment belongs to
//! the caller.
//!
//! Quota enforcement is check-then-act without a transactional reservation.
//! Two concurrent creation requests for a user exactly at quota can both
//! pass before either insert commits, so the quota is a non-strict
//! invariant: entity count should not exceed the quota, but a brief,
//! self-correcting overshoot of at most (concurrency - 1) entities under
//! concurrent requests is tolerated. This is a soft business limit, not a
//! security boundary.

use complykit_shared::SubscriptionTier;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::{FeatureFlag, PlanCatalog};
use crate::error::BillingResult;
use crate::usage::UsageService;

/// Outcome of an entitlement check
///
/// Denial is an expected business outcome, not an error: it always names the
/// tier that would satisfy the request so the caller can build an upgrade
/// prompt without a second lookup.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<SubscriptionTier>,
    pub current_tier: SubscriptionTier,
    pub used: i64,
    pub limit: i64,
}

impl EntitlementDecision {
    fn allow(tier: SubscriptionTier, used: i64, limit: i64) -> Self {
        Self {
            allowed: true,
            reason: None,
            required_tier: None,
            current_tier: tier,
            used,
            limit,
        }
    }
}

/// Enforces plan entitlements against live usage
pub struct EnforcementService {
    pool: PgPool,
    catalog: PlanCatalog,
}

impl EnforcementService {
    pub fn new(pool: PgPool, catalog: PlanCatalog) -> Self {
        Self { pool, catalog }
    }

    /// May this user create another compliance entity?
    pub async fn can_create_entity(&self, user_id: Uuid) -> BillingResult<EntitlementDecision> {
        let tier = self.resolve_tier(user_id).await;
        let used = UsageService::new(self.pool.clone())
            .entities_used(user_id)
            .await?;

        Ok(decide_entity_creation(&self.catalog, tier, used))
    }

    /// May this user use a gated feature?
    pub async fn can_use_feature(
        &self,
        user_id: Uuid,
        feature: FeatureFlag,
    ) -> BillingResult<EntitlementDecision> {
        let tier = self.resolve_tier(user_id).await;
        Ok(decide_feature_access(&self.catalog, tier, feature))
    }

    /// Resolve the user's tier from their subscriber row
    ///
    /// Absent or unreadable rows resolve to starter. The denormalized
    /// `entities_limit` column on the row is ignored here on purpose: the
    /// catalog always wins over a cached copy.
    async fn resolve_tier(&self, user_id: Uuid) -> SubscriptionTier {
        let row: Result<Option<(String, bool)>, sqlx::Error> =
            sqlx::query_as("SELECT tier, subscribed FROM subscribers WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await;

        match row {
            Ok(Some((tier, true))) => tier.parse().unwrap_or_default(),
            Ok(Some((_, false))) | Ok(None) => SubscriptionTier::default(),
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to read subscriber row; failing closed to starter"
                );
                SubscriptionTier::default()
            }
        }
    }
}

/// Pure decision: entity creation against a quota
pub fn decide_entity_creation(
    catalog: &PlanCatalog,
    tier: SubscriptionTier,
    used: i64,
) -> EntitlementDecision {
    let limit = catalog.plan(tier).entity_quota;

    if used >= limit {
        let required_tier = catalog.next_tier(tier);
        return EntitlementDecision {
            allowed: false,
            reason: Some(format!(
                "Entity limit reached ({used} of {limit} on the {tier} plan)"
            )),
            required_tier: Some(required_tier),
            current_tier: tier,
            used,
            limit,
        };
    }

    EntitlementDecision::allow(tier, used, limit)
}

/// Pure decision: feature access for a tier
pub fn decide_feature_access(
    catalog: &PlanCatalog,
    tier: SubscriptionTier,
    feature: FeatureFlag,
) -> EntitlementDecision {
    let limit = catalog.plan(tier).entity_quota;

    if catalog.plan(tier).has_feature(feature) {
        return EntitlementDecision::allow(tier, 0, limit);
    }

    let required_tier = catalog.minimum_tier_for(feature);
    EntitlementDecision {
        allowed: false,
        reason: Some(format!(
            "The {feature} feature is not included in the {tier} plan"
        )),
        required_tier: Some(required_tier),
        current_tier: tier,
        used: 0,
        limit,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starter_at_quota_is_denied_with_growth_required() {
        let catalog = PlanCatalog::default();
        let decision = decide_entity_creation(&catalog, SubscriptionTier::Starter, 4);

        assert!(!decision.allowed);
        assert_eq!(decision.required_tier, Some(SubscriptionTier::Growth));
        assert_eq!(decision.used, 4);
        assert_eq!(decision.limit, 4);
        let reason = decision.reason.unwrap();
        assert!(reason.contains("4 of 4"), "reason should carry used/limit: {reason}");
    }

    #[test]
    fn starter_below_quota_is_allowed() {
        let catalog = PlanCatalog::default();
        let decision = decide_entity_creation(&catalog, SubscriptionTier::Starter, 3);
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
        assert!(decision.required_tier.is_none());
    }

    #[test]
    fn overshoot_is_still_denied() {
        // The check-then-act race can leave a user briefly above quota; the
        // next check must still deny.
        let catalog = PlanCatalog::default();
        let decision = decide_entity_creation(&catalog, SubscriptionTier::Starter, 5);
        assert!(!decision.allowed);
    }

    #[test]
    fn enterprise_at_quota_points_back_at_enterprise() {
        let catalog = PlanCatalog::default();
        let decision = decide_entity_creation(&catalog, SubscriptionTier::Enterprise, 150);
        assert!(!decision.allowed);
        // Ladder is clamped at the top
        assert_eq!(decision.required_tier, Some(SubscriptionTier::Enterprise));
    }

    #[test]
    fn unlimited_tier_never_hits_the_quota_gate() {
        let catalog = PlanCatalog::default();
        let decision = decide_entity_creation(&catalog, SubscriptionTier::Unlimited, 1_000_000);
        assert!(decision.allowed);
    }

    #[test]
    fn feature_denial_names_the_minimum_tier() {
        let catalog = PlanCatalog::default();
        let decision =
            decide_feature_access(&catalog, SubscriptionTier::Starter, FeatureFlag::ApiAccess);

        assert!(!decision.allowed);
        assert_eq!(decision.required_tier, Some(SubscriptionTier::Professional));
    }

    #[test]
    fn feature_access_allowed_at_or_above_minimum_tier() {
        let catalog = PlanCatalog::default();
        for tier in [
            SubscriptionTier::Professional,
            SubscriptionTier::Enterprise,
            SubscriptionTier::Unlimited,
        ] {
            let decision = decide_feature_access(&catalog, tier, FeatureFlag::ApiAccess);
            assert!(decision.allowed, "{tier} should include api access");
        }
    }
}
