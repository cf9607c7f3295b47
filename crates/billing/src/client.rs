//! Stripe client wrapper

use crate::error::{BillingError, BillingResult};

/// Stripe configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_live_...` / `sk_test_...`)
    pub secret_key: String,
    /// Webhook endpoint signing secret (`whsec_...`)
    pub webhook_secret: String,
    /// Redirect target after a completed checkout
    pub checkout_success_url: String,
    /// Redirect target when the user abandons checkout
    pub checkout_cancel_url: String,
    /// Namespace prefix for price lookup keys
    pub lookup_key_namespace: String,
}

impl StripeConfig {
    /// Load Stripe configuration from environment variables
    ///
    /// Fails with a descriptive configuration error if a required variable
    /// is missing, so a misconfigured deployment dies at startup rather than
    /// on the first checkout.
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;

        let checkout_success_url = std::env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "https://app.complykit.io/billing/success".to_string());
        let checkout_cancel_url = std::env::var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "https://app.complykit.io/billing/plans".to_string());
        let lookup_key_namespace =
            std::env::var("PRICE_LOOKUP_NAMESPACE").unwrap_or_else(|_| "complykit".to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            checkout_success_url,
            checkout_cancel_url,
            lookup_key_namespace,
        })
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name)
        .map_err(|_| BillingError::Configuration(format!("{name} is not set")))
        .and_then(|v| {
            if v.is_empty() {
                Err(BillingError::Configuration(format!("{name} is empty")))
            } else {
                Ok(v)
            }
        })
}

/// Shared Stripe client handed to every billing service
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(&config.secret_key);
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// The underlying async-stripe client
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret key
        f.debug_struct("StripeClient")
            .field("lookup_key_namespace", &self.config.lookup_key_namespace)
            .finish_non_exhaustive()
    }
}
