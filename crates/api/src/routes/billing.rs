//! Billing routes for Stripe integration

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use complykit_billing::BillingInterval;
use complykit_shared::SubscriberRecord;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub tier: String,
    /// Billing interval (monthly or yearly)
    pub billing_interval: Option<String>,
}

/// Response from creating a checkout session
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Subscription info response
#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    pub tier: String,
    pub status: String,
    pub subscribed: bool,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    pub entities_limit: i64,
}

/// Create a checkout session for a subscription purchase
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let email = auth_user.email.as_deref().unwrap_or("");

    let interval = match req.billing_interval.as_deref() {
        None => BillingInterval::default(),
        Some(raw) => BillingInterval::from_str(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown billing interval: {raw}"))
        })?,
    };

    let url = billing
        .checkout
        .start_subscription_checkout(auth_user.user_id, email, &req.tier, interval)
        .await?;

    Ok(Json(CheckoutResponse { url }))
}

/// Get the caller's subscription record
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    let record: Option<SubscriberRecord> =
        sqlx::query_as("SELECT * FROM subscribers WHERE user_id = $1")
            .bind(auth_user.user_id)
            .fetch_optional(&state.pool)
            .await?;

    // Users who never started checkout read as unsubscribed starter
    let info = match record {
        Some(r) => SubscriptionInfo {
            tier: r.tier,
            status: r.status,
            subscribed: r.subscribed,
            current_period_end: r.current_period_end.map(|t| t.to_string()),
            cancel_at_period_end: r.cancel_at_period_end,
            entities_limit: r.entities_limit,
        },
        None => {
            let catalog = complykit_billing::PlanCatalog::default();
            let plan = catalog.plan_for(None);
            SubscriptionInfo {
                tier: plan.tier.to_string(),
                status: "none".to_string(),
                subscribed: false,
                current_period_end: None,
                cancel_at_period_end: false,
                entities_limit: plan.entity_quota,
            }
        }
    };

    Ok(Json(info))
}

/// Usage meter response
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub entities_used: i64,
    pub entities_limit: i64,
    pub documents_count: i64,
    pub storage_used_mb: f64,
    pub storage_quota_mb: i64,
}

/// Get the caller's live usage against their plan limits
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UsageResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let snapshot = billing.usage.snapshot(auth_user.user_id).await?;

    let tier: Option<(String,)> =
        sqlx::query_as("SELECT tier FROM subscribers WHERE user_id = $1 AND subscribed = TRUE")
            .bind(auth_user.user_id)
            .fetch_optional(&state.pool)
            .await?;
    let plan = billing.catalog.plan_for(tier.as_ref().map(|(t,)| t.as_str()));

    Ok(Json(UsageResponse {
        entities_used: snapshot.entities_used,
        entities_limit: plan.entity_quota,
        documents_count: snapshot.documents_count,
        storage_used_mb: snapshot.storage_used_mb,
        storage_quota_mb: plan.storage_quota_mb,
    }))
}

/// Handle Stripe webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    // Signature verification happens before anything else touches the
    // payload; a missing or invalid signature never reaches state.
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    let event = billing.webhooks.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = ?e, "Stripe webhook signature verification failed");
        ApiError::BadRequest("Invalid webhook signature".to_string())
    })?;

    tracing::info!(
        event_type = %event.type_,
        event_id = %event.id,
        "Stripe webhook event verified"
    );

    // A processing failure answers 5xx so Stripe redelivers; replay is safe
    // because reconciliation writes are idempotent upserts.
    billing.webhooks.handle_event(event).await.map_err(|e| {
        tracing::error!(error = %e, "Webhook handling error");
        ApiError::Internal(format!("webhook handling error: {e}"))
    })?;

    Ok(StatusCode::OK)
}
