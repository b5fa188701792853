//! Route registration

pub mod admin;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/admin/billing/plan-change", post(admin::change_plan))
        .route("/admin/billing/refund", post(admin::process_refund))
        .route("/admin/billing/profile", post(admin::update_billing))
        .route("/admin/billing/expire-promos", post(admin::expire_promos))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
