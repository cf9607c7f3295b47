// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ComplyKit Billing Module
//!
//! Handles Stripe integration for subscription billing and plan
//! entitlements.
//!
//! ## Features
//!
//! - **Plan Catalog**: single canonical definition of every tier
//! - **Catalog Sync**: idempotent Stripe product/price reconciliation
//! - **Checkout**: hosted subscription checkout sessions
//! - **Webhooks**: signature-verified reconciliation of subscription state
//! - **Entitlements**: pure tier-to-entitlement evaluation
//! - **Enforcement**: quota and feature gates over live usage
//! - **Usage Alerts**: threshold sweep with de-duplicated warnings
//! - **Invariants**: runnable consistency checks over billing state

pub mod alerts;
pub mod catalog;
pub mod catalog_sync;
pub mod checkout;
pub mod client;
pub mod customer;
pub mod enforcement;
pub mod entitlement;
pub mod error;
pub mod invariants;
pub mod notify;
pub mod usage;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Catalog
pub use catalog::{BillingInterval, FeatureFlag, Plan, PlanCatalog};

// Catalog sync
pub use catalog_sync::{CatalogSyncService, TierPriceIds};

// Checkout
pub use checkout::CheckoutService;

// Client
pub use client::{StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Enforcement
pub use enforcement::{EnforcementService, EntitlementDecision};

// Entitlement
pub use entitlement::{evaluate, has_feature, minimum_tier_for, Entitlements};

// Error
pub use error::{BillingError, BillingResult};

// Alerts
pub use alerts::{AlertMetric, SweepSummary, UsageAlertService};

// Notifications
pub use notify::NotificationService;

// Invariants
pub use invariants::{InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity};

// Usage
pub use usage::{UsageService, UsageSnapshot};

// Webhooks
pub use webhooks::{ReconcileAction, SubscriptionUpdate, WebhookHandler};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: PlanCatalog,
    pub catalog_sync: CatalogSyncService,
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub enforcement: EnforcementService,
    pub usage: UsageService,
    pub alerts: UsageAlertService,
    pub webhooks: WebhookHandler,
    pub invariants: InvariantChecker,
    pub notify: NotificationService,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::build(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::build(StripeClient::new(config), pool)
    }

    fn build(stripe: StripeClient, pool: PgPool) -> Self {
        let catalog = PlanCatalog::new(stripe.config().lookup_key_namespace.clone());
        let notify = NotificationService::from_env(pool.clone());

        Self {
            catalog: catalog.clone(),
            catalog_sync: CatalogSyncService::new(stripe.clone(), catalog.clone()),
            checkout: CheckoutService::new(stripe.clone(), pool.clone(), catalog.clone()),
            customer: CustomerService::new(stripe.clone()),
            enforcement: EnforcementService::new(pool.clone(), catalog.clone()),
            usage: UsageService::new(pool.clone()),
            alerts: UsageAlertService::new(pool.clone(), catalog.clone(), notify.clone()),
            webhooks: WebhookHandler::new(stripe, pool.clone(), catalog.clone()),
            invariants: InvariantChecker::new(pool, catalog),
            notify,
        }
    }
}
