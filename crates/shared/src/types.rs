//! Common types used across ComplyKit

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Subscription tier for billing
///
/// The tier identifier only. All numeric and feature entitlements attached to
/// a tier live in the billing crate's plan catalog, which is the single
/// canonical definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Starter,
    Growth,
    Professional,
    Enterprise,
    Unlimited,
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        Self::Starter
    }
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Growth => "growth",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
            Self::Unlimited => "unlimited",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Self::Starter),
            "growth" => Ok(Self::Growth),
            "professional" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            "unlimited" => Ok(Self::Unlimited),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Error for an unrecognized tier identifier
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown subscription tier: {0}")]
pub struct UnknownTier(pub String);

/// Local subscription record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Checkout started, waiting on the processor's completion webhook
    Pending,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A subscriber row as stored in the `subscribers` table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriberRecord {
    pub user_id: Uuid,
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub tier: String,
    pub status: String,
    pub subscribed: bool,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub entities_limit: i64,
    pub updated_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn tier_round_trips_through_strings() {
        for tier in [
            SubscriptionTier::Starter,
            SubscriptionTier::Growth,
            SubscriptionTier::Professional,
            SubscriptionTier::Enterprise,
            SubscriptionTier::Unlimited,
        ] {
            assert_eq!(SubscriptionTier::from_str(tier.as_str()).unwrap(), tier);
        }
    }

    #[test]
    fn unknown_tier_is_an_error() {
        assert!(SubscriptionTier::from_str("platinum").is_err());
        assert!(SubscriptionTier::from_str("").is_err());
        assert!(SubscriptionTier::from_str("Starter").is_err(), "case sensitive");
    }

    #[test]
    fn status_strings_match_stored_values() {
        assert_eq!(SubscriptionStatus::PastDue.as_str(), "past_due");
        assert_eq!(SubscriptionStatus::Pending.as_str(), "pending");
    }
}
