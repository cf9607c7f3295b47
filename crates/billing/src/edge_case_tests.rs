// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Core
//!
//! Boundary conditions that cut across modules:
//! - Tier resolution and fail-closed behavior
//! - Quota enforcement at, below, and past the limit
//! - Lookup-key hygiene between the catalog and the synchronizer
//! - Threshold/dedup arithmetic for the usage monitor

#[cfg(test)]
mod tier_resolution_tests {
    use crate::catalog::PlanCatalog;
    use crate::entitlement::evaluate;
    use complykit_shared::SubscriptionTier;

    // =========================================================================
    // Unknown, empty, and absent tiers all resolve to the starter plan
    // =========================================================================
    #[test]
    fn every_bad_tier_input_resolves_identically() {
        let catalog = PlanCatalog::default();
        let baseline = evaluate(&catalog, Some("starter"));

        for input in [None, Some(""), Some("gold"), Some("STARTER"), Some("starter ")] {
            let resolved = evaluate(&catalog, input);
            assert_eq!(resolved.tier, baseline.tier, "input {input:?}");
            assert_eq!(resolved.entity_quota, baseline.entity_quota, "input {input:?}");
        }
    }

    // =========================================================================
    // A tier string that parses must never silently downgrade
    // =========================================================================
    #[test]
    fn valid_tier_strings_resolve_to_themselves() {
        let catalog = PlanCatalog::default();
        for (input, expected) in [
            ("growth", SubscriptionTier::Growth),
            ("professional", SubscriptionTier::Professional),
            ("enterprise", SubscriptionTier::Enterprise),
            ("unlimited", SubscriptionTier::Unlimited),
        ] {
            assert_eq!(evaluate(&catalog, Some(input)).tier, expected);
        }
    }
}

#[cfg(test)]
mod quota_boundary_tests {
    use crate::catalog::PlanCatalog;
    use crate::enforcement::decide_entity_creation;
    use complykit_shared::SubscriptionTier;

    // =========================================================================
    // The documented boundary: used >= quota denies, used < quota allows
    // =========================================================================
    #[test]
    fn boundary_is_inclusive_at_the_quota() {
        let catalog = PlanCatalog::default();

        for (tier, quota) in [
            (SubscriptionTier::Starter, 4),
            (SubscriptionTier::Growth, 20),
            (SubscriptionTier::Professional, 50),
            (SubscriptionTier::Enterprise, 150),
        ] {
            assert!(
                decide_entity_creation(&catalog, tier, quota - 1).allowed,
                "{tier} one under quota"
            );
            assert!(
                !decide_entity_creation(&catalog, tier, quota).allowed,
                "{tier} at quota"
            );
        }
    }

    // =========================================================================
    // Denials always carry the upgrade target and the used/limit numbers
    // =========================================================================
    #[test]
    fn denial_payload_is_complete() {
        let catalog = PlanCatalog::default();
        let decision = decide_entity_creation(&catalog, SubscriptionTier::Growth, 20);

        assert!(!decision.allowed);
        assert_eq!(decision.required_tier, Some(SubscriptionTier::Professional));
        assert_eq!((decision.used, decision.limit), (20, 20));
        let reason = decision.reason.expect("denial must carry a reason");
        assert!(reason.contains("20 of 20"));
        assert!(reason.contains("growth"));
    }

    // =========================================================================
    // Zero usage is always allowed on every purchasable tier
    // =========================================================================
    #[test]
    fn fresh_accounts_can_always_create() {
        let catalog = PlanCatalog::default();
        for plan in catalog.self_serve_plans() {
            assert!(decide_entity_creation(&catalog, plan.tier, 0).allowed);
        }
    }
}

#[cfg(test)]
mod lookup_key_tests {
    use crate::catalog::{BillingInterval, PlanCatalog};

    // =========================================================================
    // Namespaces isolate environments sharing one Stripe account
    // =========================================================================
    #[test]
    fn keys_from_another_namespace_never_parse() {
        let prod = PlanCatalog::new("complykit");
        let staging = PlanCatalog::new("complykit-staging");

        let staging_key = staging.lookup_key(
            complykit_shared::SubscriptionTier::Growth,
            BillingInterval::Monthly,
        );
        assert_eq!(prod.parse_lookup_key(&staging_key), None);
        assert!(staging.parse_lookup_key(&staging_key).is_some());
    }

    // =========================================================================
    // The archival rewrite prefix can never collide with a canonical key
    // =========================================================================
    #[test]
    fn archived_keys_are_inert() {
        let catalog = PlanCatalog::default();
        let canonical = catalog.lookup_key(
            complykit_shared::SubscriptionTier::Enterprise,
            BillingInterval::Yearly,
        );
        let archived = format!("archived:{canonical}:1717171717");

        assert!(catalog.parse_lookup_key(&canonical).is_some());
        assert_eq!(catalog.parse_lookup_key(&archived), None);
    }
}

#[cfg(test)]
mod threshold_tests {
    use crate::alerts::{at_threshold, utilization_percent};

    // =========================================================================
    // 90% boundary across small quotas where rounding could bite
    // =========================================================================
    #[test]
    fn small_quota_thresholds() {
        // starter quota of 4: 3/4 = 75%, 4/4 = 100%
        assert!(!at_threshold(utilization_percent(3.0, 4)));
        assert!(at_threshold(utilization_percent(4.0, 4)));

        // growth quota of 20: 18/20 is exactly 90%
        assert!(at_threshold(utilization_percent(18.0, 20)));
        assert!(!at_threshold(utilization_percent(17.9, 20)));
    }

    // =========================================================================
    // Degenerate quotas must not divide by zero or overflow into an alert
    // =========================================================================
    #[test]
    fn degenerate_quotas_are_silent() {
        assert_eq!(utilization_percent(100.0, 0), 0.0);
        assert_eq!(utilization_percent(100.0, -1), 0.0);
        assert_eq!(utilization_percent(f64::MAX, i64::MAX), 0.0);
    }
}
