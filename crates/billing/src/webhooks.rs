//! Stripe webhook handling
//!
//! Verifies event authenticity, decodes the raw event into a typed
//! reconcile action at the boundary, and applies it as a commutative upsert.
//! Delivery is at-least-once and unordered, so every mutation here is keyed
//! on a stable external identifier (email or customer id) and converges to
//! the same final state under replay and reordering.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Customer, Event, EventObject, EventType, Expandable, Subscription, Webhook};
use time::OffsetDateTime;
use uuid::Uuid;

use complykit_shared::{SubscriptionStatus, SubscriptionTier};

use crate::catalog::PlanCatalog;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Webhook timestamp tolerance (seconds)
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A fully decoded, strongly typed reconcile action
///
/// Business logic only ever sees this type; the untyped event payload stops
/// at the decode boundary.
#[derive(Debug, Clone)]
pub enum ReconcileAction {
    /// Hosted checkout finished; the subscriber's tier and period are known
    CheckoutCompleted(SubscriptionUpdate),
    /// A recurring invoice was paid; confirms continued payment only
    InvoicePaid {
        email: Option<String>,
        customer_id: Option<String>,
    },
    /// Event type this core does not act on
    Ignore(EventType),
}

/// Decoded subscription state from a completed checkout
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub email: String,
    pub user_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub tier: Option<SubscriptionTier>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    catalog: PlanCatalog,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool, catalog: PlanCatalog) -> Self {
        Self {
            stripe,
            pool,
            catalog,
        }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Uses the library verifier first, with a manual signature check as
    /// fallback for Stripe API versions the library's event parser rejects.
    /// There is no bypass path: every inbound payload is verified against
    /// the webhook secret or refused.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::debug!(
                    stripe_error = %e,
                    "Library webhook verification failed, trying manual verification"
                );
            }
        }

        self.verify_signature_manually(payload, signature, webhook_secret)?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse verified webhook payload");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::debug!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification passed"
        );

        Ok(event)
    }

    /// Manual check of the `t=...,v1=...` signature header
    fn verify_signature_manually(
        &self,
        payload: &str,
        signature: &str,
        webhook_secret: &str,
    ) -> BillingResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Webhook signature header missing timestamp");
            BillingError::WebhookSignatureInvalid
        })?;
        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Webhook signature header missing v1 signature");
            BillingError::WebhookSignatureInvalid
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let secret_key = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let signed_payload = format!("{timestamp}.{payload}");

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Ok(())
    }

    /// Handle a verified Stripe event
    ///
    /// Errors propagate so the HTTP layer answers 5xx and the processor
    /// redelivers; reprocessing the same event is safe because every write
    /// below is an idempotent upsert.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        match self.decode(&event).await? {
            ReconcileAction::CheckoutCompleted(update) => {
                self.apply_checkout_completed(update).await
            }
            ReconcileAction::InvoicePaid { email, customer_id } => {
                self.apply_invoice_paid(email, customer_id).await
            }
            ReconcileAction::Ignore(event_type) => {
                tracing::info!(
                    event_type = %event_type,
                    event_id = %event.id,
                    "Ignoring unhandled Stripe event type"
                );
                Ok(())
            }
        }
    }

    /// Decode a raw event into a typed reconcile action
    async fn decode(&self, event: &Event) -> BillingResult<ReconcileAction> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                let session = match &event.data.object {
                    EventObject::CheckoutSession(session) => session.clone(),
                    _ => {
                        return Err(BillingError::WebhookEventNotSupported(
                            "expected a checkout session object".to_string(),
                        ))
                    }
                };
                Ok(ReconcileAction::CheckoutCompleted(
                    self.decode_checkout_session(session).await?,
                ))
            }
            EventType::InvoicePaymentSucceeded | EventType::InvoicePaid => {
                let invoice = match &event.data.object {
                    EventObject::Invoice(invoice) => invoice.clone(),
                    _ => {
                        return Err(BillingError::WebhookEventNotSupported(
                            "expected an invoice object".to_string(),
                        ))
                    }
                };
                Ok(ReconcileAction::InvoicePaid {
                    email: invoice.customer_email.clone(),
                    customer_id: expandable_id(&invoice.customer),
                })
            }
            other => Ok(ReconcileAction::Ignore(other)),
        }
    }

    async fn decode_checkout_session(
        &self,
        session: stripe::CheckoutSession,
    ) -> BillingResult<SubscriptionUpdate> {
        let customer_id = expandable_id(&session.customer);

        let user_id = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .and_then(|id| Uuid::parse_str(id).ok());

        // Email from the session itself, else from the customer record
        let email = match session
            .customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
        {
            Some(email) => email,
            None => self.fetch_customer_email(customer_id.as_deref()).await?,
        };

        // Tier and period from the subscription the checkout created. The
        // price lookup key is authoritative for the tier; the session
        // metadata is a correlation fallback when the key is absent.
        let mut tier = None;
        let mut subscription_id = None;
        let mut current_period_end = None;
        let mut cancel_at_period_end = false;

        if let Some(sub_ref) = &session.subscription {
            let subscription = self.fetch_subscription(sub_ref).await?;
            subscription_id = Some(subscription.id.to_string());
            current_period_end =
                OffsetDateTime::from_unix_timestamp(subscription.current_period_end).ok();
            cancel_at_period_end = subscription.cancel_at_period_end;

            tier = subscription
                .items
                .data
                .first()
                .and_then(|item| item.price.as_ref())
                .and_then(|price| price.lookup_key.as_deref())
                .and_then(|key| self.catalog.parse_lookup_key(key))
                .map(|(tier, _interval)| tier);
        }

        if tier.is_none() {
            tier = session
                .metadata
                .as_ref()
                .and_then(|m| m.get("tier"))
                .and_then(|t| t.parse::<SubscriptionTier>().ok());
            if tier.is_some() {
                tracing::warn!(
                    email = %email,
                    "Tier resolved from session metadata, not price lookup key"
                );
            }
        }

        Ok(SubscriptionUpdate {
            email,
            user_id,
            customer_id,
            subscription_id,
            tier,
            current_period_end,
            cancel_at_period_end,
        })
    }

    async fn fetch_subscription(
        &self,
        sub_ref: &Expandable<Subscription>,
    ) -> BillingResult<Subscription> {
        match sub_ref {
            Expandable::Object(subscription) => Ok((**subscription).clone()),
            Expandable::Id(id) => {
                let parsed = id
                    .as_str()
                    .parse()
                    .map_err(|_| BillingError::Internal(format!("invalid subscription id: {id}")))?;
                Ok(Subscription::retrieve(self.stripe.inner(), &parsed, &[]).await?)
            }
        }
    }

    async fn fetch_customer_email(&self, customer_id: Option<&str>) -> BillingResult<String> {
        let customer_id = customer_id.ok_or_else(|| {
            BillingError::WebhookEventNotSupported(
                "checkout session has neither customer email nor customer id".to_string(),
            )
        })?;
        let parsed = customer_id
            .parse()
            .map_err(|_| BillingError::Internal(format!("invalid customer id: {customer_id}")))?;
        let customer = Customer::retrieve(self.stripe.inner(), &parsed, &[]).await?;
        customer.email.ok_or_else(|| {
            BillingError::WebhookEventNotSupported(format!(
                "customer {customer_id} has no email to key subscription state on"
            ))
        })
    }

    /// Apply a completed checkout: full subscriber upsert keyed by email
    async fn apply_checkout_completed(&self, update: SubscriptionUpdate) -> BillingResult<()> {
        // Quota is denormalized for fast reads; the catalog stays the source
        // of truth and the enforcer re-derives from it on every check.
        let tier_str = update.tier.map(|t| t.as_str().to_string());
        let entities_limit = update.tier.map(|t| self.catalog.plan(t).entity_quota);
        let fallback_quota = self.catalog.plan_for(None).entity_quota;
        let user_id = update.user_id.unwrap_or_else(Uuid::new_v4);
        if update.user_id.is_none() {
            tracing::warn!(
                email = %update.email,
                "Checkout session missing user_id metadata; keying new row by email only"
            );
        }

        sqlx::query(
            r#"
            INSERT INTO subscribers
                (user_id, email, stripe_customer_id, stripe_subscription_id, tier,
                 status, subscribed, current_period_end, cancel_at_period_end,
                 entities_limit, updated_at)
            VALUES ($1, $2, $3, $4, COALESCE($5, 'starter'), $10, TRUE, $6, $7,
                    COALESCE($8, $9), NOW())
            ON CONFLICT (email) DO UPDATE SET
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscribers.stripe_customer_id),
                stripe_subscription_id = COALESCE(EXCLUDED.stripe_subscription_id, subscribers.stripe_subscription_id),
                tier = COALESCE($5, subscribers.tier),
                status = $10,
                subscribed = TRUE,
                current_period_end = COALESCE(EXCLUDED.current_period_end, subscribers.current_period_end),
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                entities_limit = COALESCE($8, subscribers.entities_limit),
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&update.email)
        .bind(&update.customer_id)
        .bind(&update.subscription_id)
        .bind(&tier_str)
        .bind(update.current_period_end)
        .bind(update.cancel_at_period_end)
        .bind(entities_limit)
        .bind(fallback_quota)
        .bind(SubscriptionStatus::Active.as_str())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            email = %update.email,
            tier = ?tier_str,
            subscription_id = ?update.subscription_id,
            "Checkout completed, subscriber reconciled"
        );

        Ok(())
    }

    /// Apply a paid invoice: confirm continued payment, never touch the tier
    async fn apply_invoice_paid(
        &self,
        email: Option<String>,
        customer_id: Option<String>,
    ) -> BillingResult<()> {
        if email.is_none() && customer_id.is_none() {
            return Err(BillingError::WebhookEventNotSupported(
                "invoice carries neither customer email nor customer id".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE subscribers
            SET subscribed = TRUE, status = $3, updated_at = NOW()
            WHERE ($1::TEXT IS NOT NULL AND email = $1)
               OR ($2::TEXT IS NOT NULL AND stripe_customer_id = $2)
            "#,
        )
        .bind(&email)
        .bind(&customer_id)
        .bind(SubscriptionStatus::Active.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // The completion webhook for this subscriber may simply not have
            // arrived yet; redelivered invoices converge later.
            tracing::warn!(
                email = ?email,
                customer_id = ?customer_id,
                "Invoice paid for unknown subscriber"
            );
        } else {
            tracing::info!(
                email = ?email,
                customer_id = ?customer_id,
                "Invoice paid, subscription confirmed active"
            );
        }

        Ok(())
    }
}

/// Extract the raw id from an optional expandable reference
fn expandable_id<T: stripe::Object>(reference: &Option<Expandable<T>>) -> Option<String>
where
    T::Id: std::fmt::Display,
{
    match reference {
        Some(Expandable::Id(id)) => Some(id.to_string()),
        Some(Expandable::Object(obj)) => Some(obj.id().to_string()),
        None => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::StripeConfig;

    fn handler_with_secret(secret: &str) -> WebhookHandler {
        let config = StripeConfig {
            secret_key: "sk_test_unit".to_string(),
            webhook_secret: secret.to_string(),
            checkout_success_url: "https://example.test/success".to_string(),
            checkout_cancel_url: "https://example.test/cancel".to_string(),
            lookup_key_namespace: "complykit".to_string(),
        };
        let stripe = StripeClient::new(config);
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unused")
            .expect("lazy pool never connects in these tests");
        WebhookHandler::new(stripe, pool, PlanCatalog::default())
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn missing_signature_parts_are_rejected() {
        let handler = handler_with_secret("whsec_testsecret");
        let payload = r#"{"id":"evt_1"}"#;

        assert!(matches!(
            handler.verify_signature_manually(payload, "", "whsec_testsecret"),
            Err(BillingError::WebhookSignatureInvalid)
        ));
        assert!(matches!(
            handler.verify_signature_manually(payload, "t=123", "whsec_testsecret"),
            Err(BillingError::WebhookSignatureInvalid)
        ));
        assert!(matches!(
            handler.verify_signature_manually(payload, "v1=deadbeef", "whsec_testsecret"),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected_even_with_valid_signature() {
        let secret = "whsec_testsecret";
        let handler = handler_with_secret(secret);
        let payload = r#"{"id":"evt_1"}"#;
        let stale = OffsetDateTime::now_utc().unix_timestamp() - SIGNATURE_TOLERANCE_SECS - 10;
        let header = format!("t={},v1={}", stale, sign(secret, stale, payload));

        assert!(matches!(
            handler.verify_signature_manually(payload, &header, secret),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let secret = "whsec_testsecret";
        let handler = handler_with_secret(secret);
        let payload = r#"{"id":"evt_1"}"#;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("t={},v1={}", now, sign("whsec_othersecret", now, payload));

        assert!(matches!(
            handler.verify_signature_manually(payload, &header, secret),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn valid_manual_signature_is_accepted() {
        let secret = "whsec_testsecret";
        let handler = handler_with_secret(secret);
        let payload = r#"{"id":"evt_1","object":"event"}"#;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("t={},v1={}", now, sign(secret, now, payload));

        assert!(handler
            .verify_signature_manually(payload, &header, secret)
            .is_ok());
    }

    #[tokio::test]
    async fn tampered_payload_fails_verification() {
        let secret = "whsec_testsecret";
        let handler = handler_with_secret(secret);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("t={},v1={}", now, sign(secret, now, r#"{"id":"evt_1"}"#));

        assert!(matches!(
            handler.verify_signature_manually(r#"{"id":"evt_2"}"#, &header, secret),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }
}
