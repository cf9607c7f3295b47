//! Entitlement evaluation
//!
//! Pure functions from a tier to its entitlements. No I/O and no side
//! effects, so the same code runs inside a request with a full user session
//! and inside a webhook handler that only knows a tier string.

use complykit_shared::SubscriptionTier;
use serde::Serialize;

use crate::catalog::{FeatureFlag, PlanCatalog};

/// The entitlements a tier grants
#[derive(Debug, Clone, Serialize)]
pub struct Entitlements {
    pub tier: SubscriptionTier,
    pub entity_quota: i64,
    pub storage_quota_mb: i64,
    pub features: Vec<FeatureFlag>,
}

/// Evaluate entitlements for an optional tier string
///
/// Fails closed: `None` and unrecognized tiers both resolve to the starter
/// plan's entitlements.
pub fn evaluate(catalog: &PlanCatalog, tier: Option<&str>) -> Entitlements {
    let plan = catalog.plan_for(tier);
    Entitlements {
        tier: plan.tier,
        entity_quota: plan.entity_quota,
        storage_quota_mb: plan.storage_quota_mb,
        features: plan.features.to_vec(),
    }
}

/// Whether a tier includes a feature
pub fn has_feature(catalog: &PlanCatalog, tier: SubscriptionTier, feature: FeatureFlag) -> bool {
    catalog.plan(tier).has_feature(feature)
}

/// Lowest ladder tier that includes a feature (upgrade-prompt copy only)
pub fn minimum_tier_for(catalog: &PlanCatalog, feature: FeatureFlag) -> SubscriptionTier {
    catalog.minimum_tier_for(feature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_fails_closed_to_starter() {
        let catalog = PlanCatalog::default();
        let from_none = evaluate(&catalog, None);
        let from_unknown = evaluate(&catalog, Some("nonexistent-tier"));
        let from_starter = evaluate(&catalog, Some("starter"));

        for e in [&from_none, &from_unknown] {
            assert_eq!(e.tier, from_starter.tier);
            assert_eq!(e.entity_quota, from_starter.entity_quota);
            assert_eq!(e.features, from_starter.features);
        }
    }

    #[test]
    fn evaluate_resolves_known_tiers() {
        let catalog = PlanCatalog::default();
        let growth = evaluate(&catalog, Some("growth"));
        assert_eq!(growth.tier, SubscriptionTier::Growth);
        assert_eq!(growth.entity_quota, 20);

        let enterprise = evaluate(&catalog, Some("enterprise"));
        assert_eq!(enterprise.entity_quota, 150);
    }

    #[test]
    fn feature_checks_follow_the_catalog() {
        let catalog = PlanCatalog::default();
        assert!(!has_feature(
            &catalog,
            SubscriptionTier::Starter,
            FeatureFlag::BulkOperations
        ));
        assert!(has_feature(
            &catalog,
            SubscriptionTier::Growth,
            FeatureFlag::BulkOperations
        ));
        assert!(has_feature(
            &catalog,
            SubscriptionTier::Unlimited,
            FeatureFlag::WhiteLabel
        ));
    }
}
