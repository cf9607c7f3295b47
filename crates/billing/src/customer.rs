//! Stripe customer resolution

use std::collections::HashMap;

use stripe::{CreateCustomer, Customer, ListCustomers};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::BillingResult;

/// Resolves Stripe customers for subscribers
///
/// At-most-one customer per email is best-effort only: Stripe's customer
/// list is eventually consistent, so two near-simultaneous checkouts can
/// each create a customer. The webhook reconciler keys local state by email,
/// so a duplicate customer is a cosmetic artifact, not a correctness issue.
pub struct CustomerService {
    stripe: StripeClient,
}

impl CustomerService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Find the Stripe customer for an email, creating one if absent
    pub async fn find_or_create(&self, user_id: Uuid, email: &str) -> BillingResult<Customer> {
        let mut list = ListCustomers::new();
        list.email = Some(email);
        list.limit = Some(1);

        let existing = Customer::list(self.stripe.inner(), &list).await?;
        if let Some(customer) = existing.data.into_iter().next() {
            tracing::debug!(
                customer_id = %customer.id,
                user_id = %user_id,
                "Reusing existing Stripe customer"
            );
            return Ok(customer);
        }

        let mut create = CreateCustomer::new();
        create.email = Some(email);
        create.metadata = Some(HashMap::from([(
            "user_id".to_string(),
            user_id.to_string(),
        )]));
        create.description = Some("ComplyKit subscriber");

        let customer = Customer::create(self.stripe.inner(), create).await?;

        tracing::info!(
            customer_id = %customer.id,
            user_id = %user_id,
            "Created Stripe customer"
        );

        Ok(customer)
    }
}
