//! Operator maintenance routes
//!
//! Gated by a static operator token, not user identity: these are deploy
//! tooling surfaces, not product features.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use complykit_billing::{InvariantCheckSummary, TierPriceIds};
use complykit_shared::SubscriptionTier;

use crate::error::ApiError;
use crate::state::AppState;

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if provided != state.config.admin_token {
        tracing::warn!("Admin endpoint called with invalid token");
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Reconcile the Stripe product/price catalog with the plan catalog
///
/// Idempotent; safe to rerun after any failure. Returns the resolved
/// tier-to-price-id map for observability.
pub async fn sync_catalog(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HashMap<SubscriptionTier, TierPriceIds>>, ApiError> {
    require_admin(&state, &headers)?;
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let resolved = billing.catalog_sync.sync().await.map_err(|e| {
        tracing::error!(error = %e, "Catalog sync failed");
        ApiError::Internal(format!("catalog sync failed: {e}"))
    })?;

    tracing::info!(tiers = resolved.len(), "Catalog sync complete");
    Ok(Json(resolved))
}

/// Run all billing invariant checks and report violations
pub async fn run_invariants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<InvariantCheckSummary>, ApiError> {
    require_admin(&state, &headers)?;
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let summary = billing.invariants.run_all_checks().await?;

    if !summary.healthy {
        tracing::warn!(
            violations = summary.violations.len(),
            "Billing invariant violations found"
        );
    }

    Ok(Json(summary))
}
