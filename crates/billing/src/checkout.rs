//! Hosted checkout session creation

use std::collections::HashMap;

use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    ListPrices, Price,
};
use uuid::Uuid;

use crate::catalog::{BillingInterval, PlanCatalog};
use crate::client::StripeClient;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};

/// Starts hosted checkout sessions for subscription purchases
///
/// Writes exactly one piece of local state: the pending subscriber row.
/// Everything after the redirect belongs to the webhook reconciler.
pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
    catalog: PlanCatalog,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool, catalog: PlanCatalog) -> Self {
        Self {
            stripe,
            pool,
            catalog,
        }
    }

    /// Start a subscription checkout; returns the hosted redirect URL
    pub async fn start_subscription_checkout(
        &self,
        user_id: Uuid,
        email: &str,
        tier: &str,
        interval: BillingInterval,
    ) -> BillingResult<String> {
        // Checkout validates strictly: a garbled tier here is a caller bug,
        // not something to fail closed over.
        let tier = tier
            .parse::<complykit_shared::SubscriptionTier>()
            .map_err(|e| BillingError::Validation(e.to_string()))?;
        let plan = self.catalog.plan(tier);
        if !plan.self_serve {
            return Err(BillingError::Validation(format!(
                "tier {tier} is not available for purchase"
            )));
        }
        if email.is_empty() {
            return Err(BillingError::Validation(
                "subscriber email is required for checkout".to_string(),
            ));
        }

        let customer = CustomerService::new(self.stripe.clone())
            .find_or_create(user_id, email)
            .await?;

        self.upsert_pending_subscriber(user_id, email, customer.id.as_str())
            .await?;

        let price = self.find_active_price(tier, interval).await?;

        let metadata = HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("tier".to_string(), tier.to_string()),
            ("billing_interval".to_string(), interval.to_string()),
        ]);

        let mut create = CreateCheckoutSession::new();
        create.mode = Some(CheckoutSessionMode::Subscription);
        create.customer = Some(customer.id.clone());
        create.success_url = Some(&self.stripe.config().checkout_success_url);
        create.cancel_url = Some(&self.stripe.config().checkout_cancel_url);
        create.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price.id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        create.metadata = Some(metadata);

        let session = CheckoutSession::create(self.stripe.inner(), create).await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            interval = %interval,
            session_id = %session.id,
            "Created checkout session"
        );

        session.url.ok_or_else(|| {
            BillingError::Internal("checkout session created without a redirect URL".to_string())
        })
    }

    /// Write the pending subscriber row
    ///
    /// Keyed by user id and safe to replay: a second checkout attempt before
    /// completion just overwrites the pending row. The existing tier (if any)
    /// is deliberately left alone; only the completion webhook assigns tiers.
    async fn upsert_pending_subscriber(
        &self,
        user_id: Uuid,
        email: &str,
        customer_id: &str,
    ) -> BillingResult<()> {
        let starter_quota = self.catalog.plan_for(None).entity_quota;

        sqlx::query(
            r#"
            INSERT INTO subscribers
                (user_id, email, stripe_customer_id, tier, status, subscribed,
                 cancel_at_period_end, entities_limit, updated_at)
            VALUES ($1, $2, $3, 'starter', $5, FALSE, FALSE, $4, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                email = EXCLUDED.email,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                status = $5,
                subscribed = FALSE,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(customer_id)
        .bind(starter_quota)
        .bind(complykit_shared::SubscriptionStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Resolve the active price for (tier, interval) by its lookup key
    ///
    /// A missing price is an ops invariant violation, not a user error, and
    /// must never be silently substituted with some other price.
    async fn find_active_price(
        &self,
        tier: complykit_shared::SubscriptionTier,
        interval: BillingInterval,
    ) -> BillingResult<Price> {
        let lookup_key = self.catalog.lookup_key(tier, interval);

        let mut list = ListPrices::new();
        list.lookup_keys = Some(vec![lookup_key.clone()]);
        list.active = Some(true);

        let prices = Price::list(self.stripe.inner(), &list).await?;
        prices.data.into_iter().next().ok_or_else(|| {
            BillingError::Configuration(format!(
                "no active price for lookup key {lookup_key} - run catalog sync"
            ))
        })
    }
}
