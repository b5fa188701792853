//! Admin billing routes
//!
//! One endpoint per gateway operation, plus the sweep trigger. Admin
//! authentication lives in the fronting proxy; the acting admin arrives in
//! the request body and lands in the audit trail.

use axum::extract::State;
use axum::Json;
use paydirt_shared::BillingProfile;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanRequest {
    pub user_id: Uuid,
    pub new_plan: String,
    pub reason: String,
    pub admin_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ChangePlanResponse {
    pub success: bool,
    pub subscription: paydirt_billing::PlanChangeOutcome,
}

pub async fn change_plan(
    State(state): State<AppState>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<ChangePlanResponse>> {
    let subscription = state
        .billing
        .admin
        .change_plan(req.user_id, &req.new_plan, &req.reason, req.admin_id)
        .await?;

    Ok(Json(ChangePlanResponse {
        success: true,
        subscription,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub reason: String,
    pub admin_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub success: bool,
    pub refund: paydirt_billing::RefundOutcome,
}

pub async fn process_refund(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Json<RefundResponse>> {
    let refund = state
        .billing
        .admin
        .process_refund(req.user_id, req.amount_cents, &req.reason, req.admin_id)
        .await?;

    Ok(Json(RefundResponse {
        success: true,
        refund,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBillingRequest {
    pub user_id: Uuid,
    pub admin_id: Uuid,
    pub billing_name: Option<String>,
    pub billing_email: Option<String>,
    pub billing_phone: Option<String>,
    pub billing_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateBillingResponse {
    pub success: bool,
    pub user: paydirt_billing::BillingUpdateOutcome,
}

pub async fn update_billing(
    State(state): State<AppState>,
    Json(req): Json<UpdateBillingRequest>,
) -> ApiResult<Json<UpdateBillingResponse>> {
    let profile = BillingProfile {
        billing_name: req.billing_name,
        billing_email: req.billing_email,
        billing_phone: req.billing_phone,
        billing_address: req.billing_address,
    };

    let user = state
        .billing
        .admin
        .update_billing(req.user_id, &profile, req.admin_id)
        .await?;

    Ok(Json(UpdateBillingResponse {
        success: true,
        user,
    }))
}

/// Manual sweep trigger; the worker hits the same code path on a schedule.
pub async fn expire_promos(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let now = OffsetDateTime::now_utc();
    let summary = state.billing.sweeper.sweep(now).await?;

    Ok(Json(json!({
        "success": true,
        "expired_count": summary.transitioned,
        "timestamp": now
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
    })))
}
