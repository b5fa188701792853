//! Persistence ports
//!
//! The engine talks to storage through these traits so the webhook path,
//! the admin gateway and the sweeper can all be exercised against in-memory
//! doubles. `PgStore` (postgres module) is the production implementation.

use async_trait::async_trait;
use paydirt_shared::{BillingProfile, PromoType};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Canonical billing-relevant view of a user row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_schedule_id: Option<String>,
    pub subscription_plan: Option<String>,
    pub subscription_status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub promo_active: bool,
    pub promo_type: Option<String>,
    pub promo_expiration_date: Option<OffsetDateTime>,
    pub billing_name: Option<String>,
    pub billing_email: Option<String>,
    pub billing_phone: Option<String>,
    pub billing_address: Option<String>,
    pub last_sync_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    /// Current billing profile columns as one value.
    pub fn billing_profile(&self) -> BillingProfile {
        BillingProfile {
            billing_name: self.billing_name.clone(),
            billing_email: self.billing_email.clone(),
            billing_phone: self.billing_phone.clone(),
            billing_address: self.billing_address.clone(),
        }
    }
}

/// Fields a reconciled event may apply to the user row. `None` fields leave
/// the column untouched; `event_time` both fences the write and becomes the
/// new `last_sync_at`.
#[derive(Debug, Clone)]
pub struct SyncUpdate {
    pub plan: Option<String>,
    pub status: Option<String>,
    pub schedule_id: Option<String>,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub event_time: OffsetDateTime,
}

/// Subscription fields written by an admin plan change.
#[derive(Debug, Clone)]
pub struct PlanFields {
    pub plan: String,
    pub status: String,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
}

/// New audit row for a completed admin operation.
#[derive(Debug, Clone)]
pub struct NewAdminAction {
    pub admin_id: Uuid,
    pub target_user_id: Uuid,
    pub action_type: &'static str,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub reason: String,
    pub external_object_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPlanChange {
    pub admin_action_id: Uuid,
    pub user_id: Uuid,
    pub from_plan: Option<String>,
    pub to_plan: String,
    pub stripe_subscription_id: String,
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub admin_action_id: Uuid,
    pub user_id: Uuid,
    pub stripe_refund_id: String,
    pub stripe_charge_id: String,
    pub amount_cents: i64,
    pub reason: String,
}

/// Exactly-once admission boundary for provider-pushed events.
///
/// `admit` must happen-before any side effect derived from the event. A
/// failed admission write fails the whole event (fail closed); entries are
/// never updated or removed.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Returns `true` if this call persisted the entry (first sighting),
    /// `false` if the event id was already present.
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        occurred_at: OffsetDateTime,
    ) -> BillingResult<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<UserRecord>>;

    /// Resolve the event target by external customer id or subscription id.
    async fn find_by_billing_ids(
        &self,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> BillingResult<Option<UserRecord>>;

    /// Timestamp-fenced reconciliation write. Applies all fields atomically
    /// and returns `false` (no mutation) when the row's `last_sync_at` is
    /// newer than the event.
    async fn apply_sync(&self, user_id: Uuid, update: &SyncUpdate) -> BillingResult<bool>;

    /// Plain read-modify-write used by the admin gateway. Does not touch
    /// `last_sync_at`: the provider's echo event re-fences the row.
    async fn set_plan(&self, user_id: Uuid, fields: &PlanFields) -> BillingResult<()>;

    async fn set_billing_profile(
        &self,
        user_id: Uuid,
        profile: &BillingProfile,
    ) -> BillingResult<()>;

    async fn activate_promo(
        &self,
        user_id: Uuid,
        promo_type: PromoType,
        expires_at: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Clear `promo_active` iff it is currently set, leaving `promo_type`
    /// and `promo_expiration_date` as history. Returns whether this call
    /// performed the transition — the fence against double handling.
    async fn end_promo(&self, user_id: Uuid) -> BillingResult<bool>;

    /// All rows with an active promo whose expiration is at or before `now`.
    async fn expired_promos(&self, now: OffsetDateTime) -> BillingResult<Vec<UserRecord>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_action(&self, action: &NewAdminAction) -> BillingResult<Uuid>;
    async fn record_plan_change(&self, change: &NewPlanChange) -> BillingResult<()>;
    async fn record_refund(&self, refund: &NewRefund) -> BillingResult<()>;
}
