//! Plan catalog
//!
//! The single canonical definition of every subscription tier: entity quota,
//! storage quota, prices, and feature set. Everything else in the system
//! (entitlement evaluation, enforcement, checkout, catalog sync) derives its
//! numbers from here; nothing may carry a second copy of this table.

use complykit_shared::SubscriptionTier;
use serde::{Deserialize, Serialize};

/// Billing interval for a subscription price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }
}

impl Default for BillingInterval {
    fn default() -> Self {
        Self::Monthly
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gated product features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    /// Store compliance documents against entities
    DocumentStorage,
    /// Renewal/filing deadline calendar
    ComplianceCalendar,
    /// Bulk entity import and batch updates
    BulkOperations,
    /// Programmatic API access
    ApiAccess,
    /// Priority support channel
    PrioritySupport,
    /// White-label client portal
    WhiteLabel,
}

impl FeatureFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentStorage => "document_storage",
            Self::ComplianceCalendar => "compliance_calendar",
            Self::BulkOperations => "bulk_operations",
            Self::ApiAccess => "api_access",
            Self::PrioritySupport => "priority_support",
            Self::WhiteLabel => "white_label",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "document_storage" => Some(Self::DocumentStorage),
            "compliance_calendar" => Some(Self::ComplianceCalendar),
            "bulk_operations" => Some(Self::BulkOperations),
            "api_access" => Some(Self::ApiAccess),
            "priority_support" => Some(Self::PrioritySupport),
            "white_label" => Some(Self::WhiteLabel),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription plan configuration
#[derive(Debug, Clone)]
pub struct Plan {
    pub tier: SubscriptionTier,
    /// Maximum number of compliance entities
    pub entity_quota: i64,
    /// Quota for the document-derived storage proxy metric, in megabytes
    pub storage_quota_mb: i64,
    pub monthly_price_cents: i64,
    pub yearly_price_cents: i64,
    pub features: &'static [FeatureFlag],
    /// Whether the tier can be purchased through checkout. Grant-only tiers
    /// are excluded from the external price catalog entirely.
    pub self_serve: bool,
    /// Display name used for the external product record
    pub display_name: &'static str,
}

impl Plan {
    /// Starter: 4 entities, documents only
    fn starter() -> Self {
        Self {
            tier: SubscriptionTier::Starter,
            entity_quota: 4,
            storage_quota_mb: 512,
            monthly_price_cents: 900,
            yearly_price_cents: 9_000,
            features: &[FeatureFlag::DocumentStorage],
            self_serve: true,
            display_name: "ComplyKit Starter",
        }
    }

    /// Growth: 20 entities, adds calendar and bulk operations
    fn growth() -> Self {
        Self {
            tier: SubscriptionTier::Growth,
            entity_quota: 20,
            storage_quota_mb: 2_048,
            monthly_price_cents: 2_900,
            yearly_price_cents: 29_000,
            features: &[
                FeatureFlag::DocumentStorage,
                FeatureFlag::ComplianceCalendar,
                FeatureFlag::BulkOperations,
            ],
            self_serve: true,
            display_name: "ComplyKit Growth",
        }
    }

    /// Professional: 50 entities, adds API access and priority support
    fn professional() -> Self {
        Self {
            tier: SubscriptionTier::Professional,
            entity_quota: 50,
            storage_quota_mb: 8_192,
            monthly_price_cents: 7_900,
            yearly_price_cents: 79_000,
            features: &[
                FeatureFlag::DocumentStorage,
                FeatureFlag::ComplianceCalendar,
                FeatureFlag::BulkOperations,
                FeatureFlag::ApiAccess,
                FeatureFlag::PrioritySupport,
            ],
            self_serve: true,
            display_name: "ComplyKit Professional",
        }
    }

    /// Enterprise: 150 entities, everything
    fn enterprise() -> Self {
        Self {
            tier: SubscriptionTier::Enterprise,
            entity_quota: 150,
            storage_quota_mb: 20_480,
            monthly_price_cents: 19_900,
            yearly_price_cents: 199_000,
            features: &[
                FeatureFlag::DocumentStorage,
                FeatureFlag::ComplianceCalendar,
                FeatureFlag::BulkOperations,
                FeatureFlag::ApiAccess,
                FeatureFlag::PrioritySupport,
                FeatureFlag::WhiteLabel,
            ],
            self_serve: true,
            display_name: "ComplyKit Enterprise",
        }
    }

    /// Unlimited: grant-only, no purchasable price
    fn unlimited() -> Self {
        Self {
            tier: SubscriptionTier::Unlimited,
            entity_quota: i64::MAX,
            storage_quota_mb: i64::MAX,
            monthly_price_cents: 0,
            yearly_price_cents: 0,
            features: &[
                FeatureFlag::DocumentStorage,
                FeatureFlag::ComplianceCalendar,
                FeatureFlag::BulkOperations,
                FeatureFlag::ApiAccess,
                FeatureFlag::PrioritySupport,
                FeatureFlag::WhiteLabel,
            ],
            self_serve: false,
            display_name: "ComplyKit Unlimited",
        }
    }

    pub fn price_cents(&self, interval: BillingInterval) -> i64 {
        match interval {
            BillingInterval::Monthly => self.monthly_price_cents,
            BillingInterval::Yearly => self.yearly_price_cents,
        }
    }

    pub fn has_feature(&self, feature: FeatureFlag) -> bool {
        self.features.contains(&feature)
    }
}

/// Upgrade ladder, lowest to highest. `unlimited` is grant-only and sits
/// outside the ladder.
const TIER_LADDER: [SubscriptionTier; 4] = [
    SubscriptionTier::Starter,
    SubscriptionTier::Growth,
    SubscriptionTier::Professional,
    SubscriptionTier::Enterprise,
];

/// The plan catalog
///
/// Tier lookup is total and fails closed: an unknown or absent tier resolves
/// to the most restrictive plan (starter), never to an error and never to an
/// open gate.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    namespace: String,
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            plans: vec![
                Plan::starter(),
                Plan::growth(),
                Plan::professional(),
                Plan::enterprise(),
                Plan::unlimited(),
            ],
        }
    }

    /// Lookup-key namespace for the external price catalog
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// All plans, ladder order first, grant-only tiers last
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Plans that are purchasable through checkout
    pub fn self_serve_plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter().filter(|p| p.self_serve)
    }

    /// Resolve a tier to its plan
    pub fn plan(&self, tier: SubscriptionTier) -> &Plan {
        self.plans
            .iter()
            .find(|p| p.tier == tier)
            .unwrap_or(&self.plans[0])
    }

    /// Resolve an optional tier string to a plan, failing closed to starter
    pub fn plan_for(&self, tier: Option<&str>) -> &Plan {
        let tier = tier
            .and_then(|t| t.parse::<SubscriptionTier>().ok())
            .unwrap_or_default();
        self.plan(tier)
    }

    /// Next tier up the upgrade ladder, clamped at the top
    pub fn next_tier(&self, tier: SubscriptionTier) -> SubscriptionTier {
        match TIER_LADDER.iter().position(|t| *t == tier) {
            Some(idx) => TIER_LADDER[(idx + 1).min(TIER_LADDER.len() - 1)],
            // Off-ladder (unlimited): nothing above it
            None => tier,
        }
    }

    /// Lowest ladder tier whose feature set contains `feature`
    ///
    /// Used for upgrade-prompt copy only; enterprise is the ceiling answer
    /// even for features no ladder tier carries.
    pub fn minimum_tier_for(&self, feature: FeatureFlag) -> SubscriptionTier {
        TIER_LADDER
            .iter()
            .copied()
            .find(|t| self.plan(*t).has_feature(feature))
            .unwrap_or(SubscriptionTier::Enterprise)
    }

    /// Canonical price lookup key: `{namespace}:{tier}:{interval}`
    pub fn lookup_key(&self, tier: SubscriptionTier, interval: BillingInterval) -> String {
        format!("{}:{}:{}", self.namespace, tier, interval)
    }

    /// Decode a canonical lookup key back to (tier, interval)
    ///
    /// Archived keys (rewritten on drift correction) intentionally do not
    /// parse, so a stale price can never be mistaken for the active one.
    pub fn parse_lookup_key(&self, key: &str) -> Option<(SubscriptionTier, BillingInterval)> {
        let mut parts = key.splitn(3, ':');
        if parts.next()? != self.namespace {
            return None;
        }
        let tier = parts.next()?.parse::<SubscriptionTier>().ok()?;
        let interval = BillingInterval::from_str(parts.next()?)?;
        Some((tier, interval))
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new("complykit")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tier_fails_closed_to_starter() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.plan_for(None).tier, SubscriptionTier::Starter);
        assert_eq!(
            catalog.plan_for(Some("nonexistent-tier")).tier,
            SubscriptionTier::Starter
        );
        assert_eq!(catalog.plan_for(Some("")).tier, SubscriptionTier::Starter);
    }

    #[test]
    fn quotas_match_published_limits() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.plan(SubscriptionTier::Starter).entity_quota, 4);
        assert_eq!(catalog.plan(SubscriptionTier::Growth).entity_quota, 20);
        assert_eq!(catalog.plan(SubscriptionTier::Professional).entity_quota, 50);
        assert_eq!(catalog.plan(SubscriptionTier::Enterprise).entity_quota, 150);
        assert_eq!(catalog.plan(SubscriptionTier::Unlimited).entity_quota, i64::MAX);
    }

    #[test]
    fn next_tier_walks_the_ladder_and_clamps() {
        let catalog = PlanCatalog::default();
        assert_eq!(
            catalog.next_tier(SubscriptionTier::Starter),
            SubscriptionTier::Growth
        );
        assert_eq!(
            catalog.next_tier(SubscriptionTier::Growth),
            SubscriptionTier::Professional
        );
        assert_eq!(
            catalog.next_tier(SubscriptionTier::Professional),
            SubscriptionTier::Enterprise
        );
        // Clamped at the top
        assert_eq!(
            catalog.next_tier(SubscriptionTier::Enterprise),
            SubscriptionTier::Enterprise
        );
        // Off-ladder tier has nothing above it
        assert_eq!(
            catalog.next_tier(SubscriptionTier::Unlimited),
            SubscriptionTier::Unlimited
        );
    }

    #[test]
    fn lookup_key_round_trips() {
        let catalog = PlanCatalog::default();
        for plan in catalog.self_serve_plans() {
            for interval in [BillingInterval::Monthly, BillingInterval::Yearly] {
                let key = catalog.lookup_key(plan.tier, interval);
                assert_eq!(catalog.parse_lookup_key(&key), Some((plan.tier, interval)));
            }
        }
    }

    #[test]
    fn foreign_and_archived_keys_do_not_parse() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.parse_lookup_key("otherapp:growth:monthly"), None);
        assert_eq!(catalog.parse_lookup_key("complykit:growth"), None);
        assert_eq!(catalog.parse_lookup_key("complykit:growth:weekly"), None);
        assert_eq!(
            catalog.parse_lookup_key("archived:complykit:growth:monthly:1717171717"),
            None
        );
    }

    #[test]
    fn minimum_tier_for_feature_is_lowest_ladder_tier() {
        let catalog = PlanCatalog::default();
        assert_eq!(
            catalog.minimum_tier_for(FeatureFlag::DocumentStorage),
            SubscriptionTier::Starter
        );
        assert_eq!(
            catalog.minimum_tier_for(FeatureFlag::BulkOperations),
            SubscriptionTier::Growth
        );
        assert_eq!(
            catalog.minimum_tier_for(FeatureFlag::ApiAccess),
            SubscriptionTier::Professional
        );
        assert_eq!(
            catalog.minimum_tier_for(FeatureFlag::WhiteLabel),
            SubscriptionTier::Enterprise
        );
    }

    #[test]
    fn self_serve_excludes_grant_only_tiers() {
        let catalog = PlanCatalog::default();
        let tiers: Vec<_> = catalog.self_serve_plans().map(|p| p.tier).collect();
        assert_eq!(
            tiers,
            vec![
                SubscriptionTier::Starter,
                SubscriptionTier::Growth,
                SubscriptionTier::Professional,
                SubscriptionTier::Enterprise,
            ]
        );
    }

    #[test]
    fn yearly_pricing_is_discounted_relative_to_monthly() {
        let catalog = PlanCatalog::default();
        for plan in catalog.self_serve_plans() {
            assert!(
                plan.yearly_price_cents < plan.monthly_price_cents * 12,
                "{} yearly should undercut 12x monthly",
                plan.tier
            );
        }
    }
}
