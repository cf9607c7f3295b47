//! Entitlement check routes
//!
//! The authoritative server-side gates. Clients may mirror these checks for
//! optimistic UI, but a mutating action is only attempted after one of these
//! endpoints answers `allowed = true`.

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Serialize;

use complykit_billing::{EntitlementDecision, FeatureFlag};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Wire form of an entitlement decision
#[derive(Debug, Serialize)]
pub struct EntitlementCheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<String>,
    pub current_tier: String,
    pub used: i64,
    pub limit: i64,
}

impl From<EntitlementDecision> for EntitlementCheckResponse {
    fn from(decision: EntitlementDecision) -> Self {
        Self {
            allowed: decision.allowed,
            error: decision.reason,
            required_tier: decision.required_tier.map(|t| t.to_string()),
            current_tier: decision.current_tier.to_string(),
            used: decision.used,
            limit: decision.limit,
        }
    }
}

/// May the caller create another compliance entity?
pub async fn check_entity_creation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<EntitlementCheckResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let decision = billing
        .enforcement
        .can_create_entity(auth_user.user_id)
        .await?;

    Ok(Json(decision.into()))
}

/// May the caller use a gated feature?
pub async fn check_feature(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(feature): Path<String>,
) -> Result<Json<EntitlementCheckResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let feature = FeatureFlag::from_str(&feature)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown feature: {feature}")))?;

    let decision = billing
        .enforcement
        .can_use_feature(auth_user.user_id, feature)
        .await?;

    Ok(Json(decision.into()))
}
