//! External price-catalog synchronization
//!
//! Pushes the plan catalog out to Stripe: one active product per tier, one
//! active recurring price per (tier, interval), addressed by lookup key.
//! The routine is an operator-triggered maintenance action and is idempotent:
//! a second run against an unchanged catalog performs zero writes.

use std::collections::HashMap;

use complykit_shared::SubscriptionTier;
use serde::Serialize;
use stripe::{
    CreatePrice, CreatePriceRecurring, CreatePriceRecurringInterval, CreateProduct, Currency,
    Expandable, IdOrCreate, ListPrices, ListProducts, Price, Product, UpdatePrice, UpdateProduct,
};
use time::OffsetDateTime;

use crate::catalog::{BillingInterval, Plan, PlanCatalog};
use crate::client::StripeClient;
use crate::error::BillingResult;

/// Resolved external catalog identifiers for one tier
#[derive(Debug, Clone, Serialize)]
pub struct TierPriceIds {
    pub product_id: String,
    pub monthly_price_id: String,
    pub yearly_price_id: String,
}

/// Synchronizes Stripe products and prices with the plan catalog
pub struct CatalogSyncService {
    stripe: StripeClient,
    catalog: PlanCatalog,
}

impl CatalogSyncService {
    pub fn new(stripe: StripeClient, catalog: PlanCatalog) -> Self {
        Self { stripe, catalog }
    }

    /// Reconcile the whole catalog; returns tier -> external ids
    ///
    /// Any single Stripe error aborts the run and surfaces raw. There is no
    /// partial-retry logic: the search-then-create/update structure makes a
    /// rerun from scratch converge on the same end state.
    pub async fn sync(&self) -> BillingResult<HashMap<SubscriptionTier, TierPriceIds>> {
        let mut resolved = HashMap::new();

        for plan in self.catalog.self_serve_plans() {
            let product = self.ensure_product(plan).await?;
            let product_id = product.id.to_string();

            let monthly = self
                .ensure_price(&product_id, plan, BillingInterval::Monthly)
                .await?;
            let yearly = self
                .ensure_price(&product_id, plan, BillingInterval::Yearly)
                .await?;

            tracing::info!(
                tier = %plan.tier,
                product_id = %product_id,
                monthly_price_id = %monthly.id,
                yearly_price_id = %yearly.id,
                "Catalog entry reconciled"
            );

            resolved.insert(
                plan.tier,
                TierPriceIds {
                    product_id,
                    monthly_price_id: monthly.id.to_string(),
                    yearly_price_id: yearly.id.to_string(),
                },
            );
        }

        Ok(resolved)
    }

    /// Find the active product tagged with this tier, creating or healing it
    ///
    /// The correlating attribute is `metadata.tier`; product name and
    /// description are rewritten whenever they drift from the catalog.
    async fn ensure_product(&self, plan: &Plan) -> BillingResult<Product> {
        let mut list = ListProducts::new();
        list.active = Some(true);
        list.limit = Some(100);

        let products = Product::list(self.stripe.inner(), &list).await?;
        let existing = products.data.into_iter().find(|p| {
            p.metadata
                .as_ref()
                .and_then(|m| m.get("tier"))
                .is_some_and(|t| t == plan.tier.as_str())
        });

        let description = plan_description(plan);

        if let Some(product) = existing {
            let name_matches = product.name.as_deref() == Some(plan.display_name);
            let description_matches = product.description.as_deref() == Some(&description);
            if name_matches && description_matches {
                return Ok(product);
            }

            // The tier tag already matched (it found the product); only the
            // display fields can have drifted.
            tracing::info!(
                tier = %plan.tier,
                product_id = %product.id,
                "Healing drifted product record"
            );

            let mut update = UpdateProduct::new();
            update.name = Some(plan.display_name);
            update.description = Some(description);

            let healed = Product::update(self.stripe.inner(), &product.id, update).await?;
            return Ok(healed);
        }

        let mut create = CreateProduct::new(plan.display_name);
        create.description = Some(&description);
        create.metadata = Some(HashMap::from([(
            "tier".to_string(),
            plan.tier.as_str().to_string(),
        )]));

        let product = Product::create(self.stripe.inner(), create).await?;
        tracing::info!(tier = %plan.tier, product_id = %product.id, "Created product");
        Ok(product)
    }

    /// Ensure exactly one active price with the canonical lookup key
    async fn ensure_price(
        &self,
        product_id: &str,
        plan: &Plan,
        interval: BillingInterval,
    ) -> BillingResult<Price> {
        let lookup_key = self.catalog.lookup_key(plan.tier, interval);
        let amount = plan.price_cents(interval);

        let mut list = ListPrices::new();
        list.lookup_keys = Some(vec![lookup_key.clone()]);
        list.active = Some(true);

        let prices = Price::list(self.stripe.inner(), &list).await?;

        if let Some(price) = prices.data.into_iter().next() {
            if price_matches(&price, amount, interval, product_id) {
                return Ok(price);
            }

            // Price amounts are immutable once created; correction means
            // archive the stale record and mint a replacement. The archived
            // lookup key is timestamped so it can never shadow the canonical
            // one.
            let archived_key = format!(
                "archived:{}:{}",
                lookup_key,
                OffsetDateTime::now_utc().unix_timestamp()
            );
            tracing::warn!(
                tier = %plan.tier,
                interval = %interval,
                price_id = %price.id,
                archived_key = %archived_key,
                "Archiving drifted price and creating replacement"
            );

            let mut deactivate = UpdatePrice::new();
            deactivate.active = Some(false);
            deactivate.lookup_key = Some(&archived_key);
            Price::update(self.stripe.inner(), &price.id, deactivate).await?;
        }

        self.create_price(product_id, plan, interval, &lookup_key, amount)
            .await
    }

    async fn create_price(
        &self,
        product_id: &str,
        plan: &Plan,
        interval: BillingInterval,
        lookup_key: &str,
        amount: i64,
    ) -> BillingResult<Price> {
        let mut create = CreatePrice::new(Currency::USD);
        create.product = Some(IdOrCreate::Id(product_id));
        create.unit_amount = Some(amount);
        create.nickname = Some(plan.display_name);
        create.lookup_key = Some(lookup_key);
        // Reclaims the key if a deactivated price somehow still holds it
        create.transfer_lookup_key = Some(true);
        create.recurring = Some(CreatePriceRecurring {
            interval: match interval {
                BillingInterval::Monthly => CreatePriceRecurringInterval::Month,
                BillingInterval::Yearly => CreatePriceRecurringInterval::Year,
            },
            ..Default::default()
        });
        create.metadata = Some(HashMap::from([(
            "tier".to_string(),
            plan.tier.as_str().to_string(),
        )]));

        let price = Price::create(self.stripe.inner(), create).await?;
        tracing::info!(
            tier = %plan.tier,
            interval = %interval,
            price_id = %price.id,
            amount_cents = amount,
            "Created price"
        );
        Ok(price)
    }
}

/// Whether an existing price exactly matches the catalog entry
fn price_matches(price: &Price, amount: i64, interval: BillingInterval, product_id: &str) -> bool {
    let amount_matches = price.unit_amount == Some(amount);

    let interval_matches = price.recurring.as_ref().is_some_and(|r| {
        matches!(
            (interval, r.interval),
            (BillingInterval::Monthly, stripe::RecurringInterval::Month)
                | (BillingInterval::Yearly, stripe::RecurringInterval::Year)
        )
    });

    let product_matches = match &price.product {
        Some(Expandable::Id(id)) => id.as_str() == product_id,
        Some(Expandable::Object(p)) => p.id.as_str() == product_id,
        None => false,
    };

    amount_matches && interval_matches && product_matches
}

fn plan_description(plan: &Plan) -> String {
    format!(
        "Up to {} tracked entities with {} GB document storage",
        plan.entity_quota,
        plan.storage_quota_mb / 1024
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_reflects_catalog_quotas() {
        let catalog = PlanCatalog::default();
        let growth = catalog.plan(SubscriptionTier::Growth);
        assert_eq!(
            plan_description(growth),
            "Up to 20 tracked entities with 2 GB document storage"
        );
    }
}
