//! In-memory doubles for the persistence, provider, and notification ports.
//!
//! These mirror the semantics of the production implementations (unique-id
//! admission, timestamp fence, flag-fenced promo close) so the services can
//! be exercised without Postgres or Stripe. Failure-injection flags simulate
//! the partial-failure windows the error taxonomy is built around.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use paydirt_shared::{BillingProfile, PromoType};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::notify::NotificationSender;
use crate::provider::{BillingProvider, ProviderCharge, ProviderRefund, ProviderSubscription};
use crate::store::{
    AuditStore, EventLedger, NewAdminAction, NewPlanChange, NewRefund, PlanFields, SyncUpdate,
    UserRecord, UserStore,
};

pub(crate) fn user_fixture() -> UserRecord {
    UserRecord {
        id: Uuid::new_v4(),
        email: "miner@example.com".to_string(),
        stripe_customer_id: Some("cus_1".to_string()),
        stripe_subscription_id: Some("sub_1".to_string()),
        stripe_schedule_id: None,
        subscription_plan: Some("Prospector".to_string()),
        subscription_status: "active".to_string(),
        current_period_start: None,
        current_period_end: None,
        promo_active: false,
        promo_type: None,
        promo_expiration_date: None,
        billing_name: None,
        billing_email: None,
        billing_phone: None,
        billing_address: None,
        last_sync_at: None,
        updated_at: OffsetDateTime::now_utc(),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LedgerEntry {
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredAction {
    pub id: Uuid,
    pub action: NewAdminAction,
}

#[derive(Default)]
struct MemoryState {
    users: Vec<UserRecord>,
    ledger: Vec<LedgerEntry>,
    actions: Vec<StoredAction>,
    plan_changes: Vec<NewPlanChange>,
    refunds: Vec<NewRefund>,
}

pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
    pub fail_admit: AtomicBool,
    pub fail_set_plan: AtomicBool,
    pub fail_end_promo_for: Mutex<HashSet<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            fail_admit: AtomicBool::new(false),
            fail_set_plan: AtomicBool::new(false),
            fail_end_promo_for: Mutex::new(HashSet::new()),
        }
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.state.lock().unwrap().users.push(user);
    }

    pub fn user(&self, id: Uuid) -> UserRecord {
        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .expect("user not in store")
    }

    pub fn ledger_len(&self) -> usize {
        self.state.lock().unwrap().ledger.len()
    }

    pub fn actions(&self) -> Vec<StoredAction> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn plan_changes(&self) -> Vec<NewPlanChange> {
        self.state.lock().unwrap().plan_changes.clone()
    }

    pub fn refunds(&self) -> Vec<NewRefund> {
        self.state.lock().unwrap().refunds.clone()
    }
}

#[async_trait]
impl EventLedger for MemoryStore {
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        occurred_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        if self.fail_admit.load(Ordering::SeqCst) {
            return Err(BillingError::Database("simulated ledger outage".into()));
        }

        let mut state = self.state.lock().unwrap();
        if state.ledger.iter().any(|e| e.event_id == event_id) {
            return Ok(false);
        }
        state.ledger.push(LedgerEntry {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            occurred_at,
        });
        Ok(true)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<UserRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn find_by_billing_ids(
        &self,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> BillingResult<Option<UserRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| {
                (customer_id.is_some() && u.stripe_customer_id.as_deref() == customer_id)
                    || (subscription_id.is_some()
                        && u.stripe_subscription_id.as_deref() == subscription_id)
            })
            .cloned())
    }

    async fn apply_sync(&self, user_id: Uuid, update: &SyncUpdate) -> BillingResult<bool> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(BillingError::UserNotFound(user_id))?;

        // Same fence as the production UPDATE's WHERE clause.
        let fresh = user
            .last_sync_at
            .map_or(true, |last| last <= update.event_time);
        if !fresh {
            return Ok(false);
        }

        if let Some(plan) = &update.plan {
            user.subscription_plan = Some(plan.clone());
        }
        if let Some(status) = &update.status {
            user.subscription_status = status.clone();
        }
        if let Some(schedule_id) = &update.schedule_id {
            user.stripe_schedule_id = Some(schedule_id.clone());
        }
        if update.period_start.is_some() {
            user.current_period_start = update.period_start;
        }
        if update.period_end.is_some() {
            user.current_period_end = update.period_end;
        }
        user.last_sync_at = Some(update.event_time);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn set_plan(&self, user_id: Uuid, fields: &PlanFields) -> BillingResult<()> {
        if self.fail_set_plan.load(Ordering::SeqCst) {
            return Err(BillingError::Database("simulated write failure".into()));
        }

        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(BillingError::UserNotFound(user_id))?;

        user.subscription_plan = Some(fields.plan.clone());
        user.subscription_status = fields.status.clone();
        if fields.period_start.is_some() {
            user.current_period_start = fields.period_start;
        }
        if fields.period_end.is_some() {
            user.current_period_end = fields.period_end;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn set_billing_profile(
        &self,
        user_id: Uuid,
        profile: &BillingProfile,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(BillingError::UserNotFound(user_id))?;

        user.billing_name = profile.billing_name.clone();
        user.billing_email = profile.billing_email.clone();
        user.billing_phone = profile.billing_phone.clone();
        user.billing_address = profile.billing_address.clone();
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn activate_promo(
        &self,
        user_id: Uuid,
        promo_type: PromoType,
        expires_at: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(BillingError::UserNotFound(user_id))?;

        user.promo_active = true;
        user.promo_type = Some(promo_type.as_str().to_string());
        user.promo_expiration_date = Some(expires_at);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn end_promo(&self, user_id: Uuid) -> BillingResult<bool> {
        if self.fail_end_promo_for.lock().unwrap().contains(&user_id) {
            return Err(BillingError::Database("simulated write failure".into()));
        }

        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(BillingError::UserNotFound(user_id))?;

        if !user.promo_active {
            return Ok(false);
        }
        user.promo_active = false;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn expired_promos(&self, now: OffsetDateTime) -> BillingResult<Vec<UserRecord>> {
        let mut expired: Vec<UserRecord> = self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|u| u.promo_active && u.promo_expiration_date.is_some_and(|t| t <= now))
            .cloned()
            .collect();
        expired.sort_by_key(|u| u.promo_expiration_date);
        Ok(expired)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn record_action(&self, action: &NewAdminAction) -> BillingResult<Uuid> {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().actions.push(StoredAction {
            id,
            action: action.clone(),
        });
        Ok(id)
    }

    async fn record_plan_change(&self, change: &NewPlanChange) -> BillingResult<()> {
        self.state.lock().unwrap().plan_changes.push(change.clone());
        Ok(())
    }

    async fn record_refund(&self, refund: &NewRefund) -> BillingResult<()> {
        self.state.lock().unwrap().refunds.push(refund.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProviderCall {
    ReplacePrice {
        subscription_id: String,
        price_id: String,
    },
    LatestPaidCharge {
        customer_id: String,
    },
    CreateRefund {
        charge_id: String,
        amount_cents: i64,
    },
    UpdateCustomer {
        customer_id: String,
    },
}

/// Recording provider double. Defaults to a healthy provider with one
/// refundable 4900-cent charge on file.
pub(crate) struct MockProvider {
    calls: Mutex<Vec<ProviderCall>>,
    pub fail_replace: AtomicBool,
    pub fail_refund: AtomicBool,
    pub charge: Mutex<Option<ProviderCharge>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_replace: AtomicBool::new(false),
            fail_refund: AtomicBool::new(false),
            charge: Mutex::new(Some(ProviderCharge {
                charge_id: "ch_1".to_string(),
                invoice_id: "in_1".to_string(),
                amount_cents: 4900,
                created_at: OffsetDateTime::now_utc(),
            })),
        }
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BillingProvider for MockProvider {
    async fn replace_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        self.record(ProviderCall::ReplacePrice {
            subscription_id: subscription_id.to_string(),
            price_id: price_id.to_string(),
        });

        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(BillingError::StripeApi("simulated provider outage".into()));
        }

        let now = OffsetDateTime::now_utc();
        Ok(ProviderSubscription {
            id: subscription_id.to_string(),
            status: "active".to_string(),
            current_period_start: Some(now),
            current_period_end: Some(now + time::Duration::days(30)),
        })
    }

    async fn latest_paid_charge(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<ProviderCharge>> {
        self.record(ProviderCall::LatestPaidCharge {
            customer_id: customer_id.to_string(),
        });
        Ok(self.charge.lock().unwrap().clone())
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        _reason: &str,
    ) -> BillingResult<ProviderRefund> {
        self.record(ProviderCall::CreateRefund {
            charge_id: charge_id.to_string(),
            amount_cents,
        });

        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(BillingError::StripeApi("simulated refund failure".into()));
        }

        Ok(ProviderRefund {
            id: "re_1".to_string(),
            amount_cents,
            status: "succeeded".to_string(),
        })
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        _profile: &BillingProfile,
    ) -> BillingResult<()> {
        self.record(ProviderCall::UpdateCustomer {
            customer_id: customer_id.to_string(),
        });
        Ok(())
    }
}

/// Recording notification double.
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn sent_of_kind(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == kind)
            .count()
    }

    fn record(&self, kind: &str, email: &str) -> BillingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BillingError::Internal("simulated email outage".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((kind.to_string(), email.to_string()));
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_plan_upgraded(&self, email: &str, _plan: &str) -> BillingResult<()> {
        self.record("plan_upgraded", email)
    }

    async fn send_promo_expired(&self, email: &str, _plan: Option<&str>) -> BillingResult<()> {
        self.record("promo_expired", email)
    }

    async fn send_payment_failed(&self, email: &str, _amount_cents: i64) -> BillingResult<()> {
        self.record("payment_failed", email)
    }
}
