//! Route definitions

pub mod admin;
pub mod billing;
pub mod entitlements;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::auth::auth_middleware;
use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    // The webhook endpoint authenticates by payload signature, not caller
    // identity, and must stay outside the auth middleware.
    let public = Router::new()
        .route("/health", get(health))
        .route("/billing/webhook", post(billing::webhook));

    let authed = Router::new()
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/usage", get(billing::get_usage))
        .route(
            "/billing/entitlements/entity-creation",
            get(entitlements::check_entity_creation),
        )
        .route(
            "/billing/entitlements/feature/{feature}",
            get(entitlements::check_feature),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin = Router::new()
        .route("/admin/catalog/sync", post(admin::sync_catalog))
        .route("/admin/invariants", get(admin::run_invariants));

    Router::new()
        .merge(public)
        .merge(authed)
        .merge(admin)
        .with_state(state)
}

/// Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
