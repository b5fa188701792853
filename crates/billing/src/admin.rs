//! Admin override gateway
//!
//! Administrator-initiated mutations follow one three-phase protocol:
//! validate, mutate the provider, then mutate the internal record and append
//! the audit trail. A provider failure aborts before any internal write; an
//! internal failure after provider success is a consistency window and is
//! surfaced as its own error class, never swallowed.

use std::sync::Arc;

use paydirt_shared::BillingProfile;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::provider::BillingProvider;
use crate::store::{
    AuditStore, NewAdminAction, NewPlanChange, NewRefund, PlanFields, UserRecord, UserStore,
};

/// Result of a completed plan change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChangeOutcome {
    pub id: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
}

/// Result of a completed refund.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutcome {
    pub id: String,
    pub amount_cents: i64,
    pub status: String,
}

/// Result of a completed billing profile update.
#[derive(Debug, Clone, Serialize)]
pub struct BillingUpdateOutcome {
    #[serde(flatten)]
    pub profile: BillingProfile,
}

#[derive(Clone)]
pub struct AdminGateway {
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditStore>,
    provider: Arc<dyn BillingProvider>,
    catalog: Arc<PlanCatalog>,
}

impl AdminGateway {
    pub fn new(
        users: Arc<dyn UserStore>,
        audit: Arc<dyn AuditStore>,
        provider: Arc<dyn BillingProvider>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            users,
            audit,
            provider,
            catalog,
        }
    }

    async fn load_user(&self, user_id: Uuid) -> BillingResult<UserRecord> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(BillingError::UserNotFound(user_id))
    }

    /// Move a user to a different plan, provider first.
    pub async fn change_plan(
        &self,
        user_id: Uuid,
        new_plan: &str,
        reason: &str,
        admin_id: Uuid,
    ) -> BillingResult<PlanChangeOutcome> {
        // Phase 1: validate. Nothing external happens on failure.
        let user = self.load_user(user_id).await?;
        let subscription_id = user
            .stripe_subscription_id
            .clone()
            .ok_or(BillingError::MissingBillingIdentity(user_id, "subscription"))?;
        let price_id = self
            .catalog
            .price_for_plan(new_plan)
            .ok_or_else(|| BillingError::UnknownPlan(new_plan.to_string()))?;

        // Phase 2: the provider mutation is authoritative; abort on failure.
        let subscription = self
            .provider
            .replace_subscription_price(&subscription_id, price_id)
            .await?;

        // Phase 3: internal write, then audit.
        let fields = PlanFields {
            plan: new_plan.to_string(),
            status: subscription.status.clone(),
            period_start: subscription.current_period_start,
            period_end: subscription.current_period_end,
        };
        self.users
            .set_plan(user.id, &fields)
            .await
            .map_err(|e| self.consistency("plan_change", user.id, e))?;

        let action_id = self
            .audit
            .record_action(&NewAdminAction {
                admin_id,
                target_user_id: user.id,
                action_type: "plan_change",
                old_value: json!({
                    "subscription_plan": user.subscription_plan,
                    "subscription_status": user.subscription_status,
                }),
                new_value: json!({
                    "subscription_plan": new_plan,
                    "subscription_status": subscription.status,
                }),
                reason: reason.to_string(),
                external_object_id: Some(subscription.id.clone()),
            })
            .await
            .map_err(|e| self.consistency("plan_change_audit", user.id, e))?;

        self.audit
            .record_plan_change(&NewPlanChange {
                admin_action_id: action_id,
                user_id: user.id,
                from_plan: user.subscription_plan.clone(),
                to_plan: new_plan.to_string(),
                stripe_subscription_id: subscription.id.clone(),
            })
            .await
            .map_err(|e| self.consistency("plan_change_audit", user.id, e))?;

        tracing::info!(
            user_id = %user.id,
            admin_id = %admin_id,
            from_plan = ?user.subscription_plan,
            to_plan = new_plan,
            subscription_id = %subscription.id,
            "Admin plan change completed"
        );

        Ok(PlanChangeOutcome {
            id: subscription.id,
            status: subscription.status,
            current_period_end: subscription.current_period_end,
        })
    }

    /// Refund the most recent successful charge, in part or full.
    pub async fn process_refund(
        &self,
        user_id: Uuid,
        amount_cents: i64,
        reason: &str,
        admin_id: Uuid,
    ) -> BillingResult<RefundOutcome> {
        if amount_cents <= 0 {
            return Err(BillingError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }

        let user = self.load_user(user_id).await?;
        let customer_id = user
            .stripe_customer_id
            .clone()
            .ok_or(BillingError::MissingBillingIdentity(user_id, "customer"))?;

        let charge = self
            .provider
            .latest_paid_charge(&customer_id)
            .await?
            .ok_or_else(|| BillingError::NoRefundableCharge(customer_id.clone()))?;

        if amount_cents > charge.amount_cents {
            return Err(BillingError::Validation(format!(
                "refund of {amount_cents} exceeds last charge of {}",
                charge.amount_cents
            )));
        }

        let refund = self
            .provider
            .create_refund(&charge.charge_id, amount_cents, reason)
            .await?;

        // Refunds never touch subscription fields; only the audit trail.
        let action_id = self
            .audit
            .record_action(&NewAdminAction {
                admin_id,
                target_user_id: user.id,
                action_type: "refund",
                old_value: json!({
                    "charge_id": charge.charge_id,
                    "charge_amount_cents": charge.amount_cents,
                }),
                new_value: json!({
                    "refund_id": refund.id,
                    "amount_cents": refund.amount_cents,
                    "status": refund.status,
                }),
                reason: reason.to_string(),
                external_object_id: Some(refund.id.clone()),
            })
            .await
            .map_err(|e| self.consistency("refund_audit", user.id, e))?;

        self.audit
            .record_refund(&NewRefund {
                admin_action_id: action_id,
                user_id: user.id,
                stripe_refund_id: refund.id.clone(),
                stripe_charge_id: charge.charge_id.clone(),
                amount_cents: refund.amount_cents,
                reason: reason.to_string(),
            })
            .await
            .map_err(|e| self.consistency("refund_audit", user.id, e))?;

        tracing::info!(
            user_id = %user.id,
            admin_id = %admin_id,
            refund_id = %refund.id,
            charge_id = %charge.charge_id,
            amount_cents = amount_cents,
            "Admin refund completed"
        );

        Ok(RefundOutcome {
            id: refund.id,
            amount_cents: refund.amount_cents,
            status: refund.status,
        })
    }

    /// Push billing profile fields to the provider's customer object, then
    /// mirror them onto the user row. Never touches the login email.
    pub async fn update_billing(
        &self,
        user_id: Uuid,
        profile: &BillingProfile,
        admin_id: Uuid,
    ) -> BillingResult<BillingUpdateOutcome> {
        if profile.is_empty() {
            return Err(BillingError::Validation(
                "no billing fields supplied".to_string(),
            ));
        }

        let user = self.load_user(user_id).await?;
        let customer_id = user
            .stripe_customer_id
            .clone()
            .ok_or(BillingError::MissingBillingIdentity(user_id, "customer"))?;

        self.provider.update_customer(&customer_id, profile).await?;

        let old_profile = user.billing_profile();
        let merged = merge_profile(&old_profile, profile);

        self.users
            .set_billing_profile(user.id, &merged)
            .await
            .map_err(|e| self.consistency("billing_update", user.id, e))?;

        self.audit
            .record_action(&NewAdminAction {
                admin_id,
                target_user_id: user.id,
                action_type: "billing_update",
                old_value: json!(old_profile),
                new_value: json!(merged),
                reason: "billing profile update".to_string(),
                external_object_id: Some(customer_id),
            })
            .await
            .map_err(|e| self.consistency("billing_update_audit", user.id, e))?;

        tracing::info!(
            user_id = %user.id,
            admin_id = %admin_id,
            "Admin billing profile update completed"
        );

        Ok(BillingUpdateOutcome { profile: merged })
    }

    /// Classify an internal failure that happened after the provider
    /// mutation already succeeded. The two systems now diverge until the
    /// next reconciling event; operators need to hear about it.
    fn consistency(&self, op: &'static str, user_id: Uuid, err: BillingError) -> BillingError {
        tracing::error!(
            op = op,
            user_id = %user_id,
            error = %err,
            "CONSISTENCY WINDOW: provider mutation succeeded but internal write failed. \
             Row converges on the next provider event or manual operator action."
        );
        BillingError::Consistency(format!("{op} for user {user_id}: {err}"))
    }
}

/// Supplied fields win; unspecified fields keep their current values.
fn merge_profile(current: &BillingProfile, update: &BillingProfile) -> BillingProfile {
    BillingProfile {
        billing_name: update
            .billing_name
            .clone()
            .or_else(|| current.billing_name.clone()),
        billing_email: update
            .billing_email
            .clone()
            .or_else(|| current.billing_email.clone()),
        billing_phone: update
            .billing_phone
            .clone()
            .or_else(|| current.billing_phone.clone()),
        billing_address: update
            .billing_address
            .clone()
            .or_else(|| current.billing_address.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PlanEntry, PLAN_PATHFINDER, PLAN_PROSPECTOR};
    use crate::testing::{user_fixture, MemoryStore, MockProvider, ProviderCall};
    use std::sync::atomic::Ordering;

    fn catalog() -> Arc<PlanCatalog> {
        Arc::new(PlanCatalog::new(vec![
            PlanEntry {
                price_id: "price_prospector".into(),
                plan: PLAN_PROSPECTOR.into(),
                promo: None,
            },
            PlanEntry {
                price_id: "price_pathfinder".into(),
                plan: PLAN_PATHFINDER.into(),
                promo: None,
            },
        ]))
    }

    fn gateway(store: &Arc<MemoryStore>, provider: &Arc<MockProvider>) -> AdminGateway {
        AdminGateway::new(store.clone(), store.clone(), provider.clone(), catalog())
    }

    #[tokio::test]
    async fn change_plan_updates_row_and_writes_audit() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user);

        let admin_id = Uuid::new_v4();
        let outcome = gateway(&store, &provider)
            .change_plan(user_id, PLAN_PATHFINDER, "customer asked to upgrade", admin_id)
            .await
            .unwrap();

        assert_eq!(outcome.status, "active");
        assert!(provider.calls().iter().any(|c| matches!(
            c,
            ProviderCall::ReplacePrice { price_id, .. } if price_id == "price_pathfinder"
        )));

        let user = store.user(user_id);
        assert_eq!(user.subscription_plan.as_deref(), Some(PLAN_PATHFINDER));

        let actions = store.actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action.action_type, "plan_change");
        assert_eq!(actions[0].action.admin_id, admin_id);
        assert_eq!(store.plan_changes().len(), 1);
        assert_eq!(store.plan_changes()[0].to_plan, PLAN_PATHFINDER);
    }

    #[tokio::test]
    async fn provider_failure_leaves_row_and_audit_untouched() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        provider.fail_replace.store(true, Ordering::SeqCst);
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user);

        let result = gateway(&store, &provider)
            .change_plan(user_id, PLAN_PATHFINDER, "upgrade", Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(BillingError::StripeApi(_))));
        let user = store.user(user_id);
        assert_eq!(user.subscription_plan.as_deref(), Some(PLAN_PROSPECTOR));
        assert!(store.actions().is_empty(), "no audit row on failure");
        assert!(store.plan_changes().is_empty());
    }

    #[tokio::test]
    async fn change_plan_without_subscription_makes_no_provider_call() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let mut user = user_fixture();
        user.stripe_subscription_id = None;
        let user_id = user.id;
        store.insert_user(user);

        let result = gateway(&store, &provider)
            .change_plan(user_id, PLAN_PATHFINDER, "upgrade", Uuid::new_v4())
            .await;

        assert!(matches!(
            result,
            Err(BillingError::MissingBillingIdentity(_, "subscription"))
        ));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_plan_is_rejected_before_provider_call() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user);

        let result = gateway(&store, &provider)
            .change_plan(user_id, "Gold Pan", "upgrade", Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(BillingError::UnknownPlan(_))));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn internal_write_failure_after_provider_success_is_consistency() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        store.fail_set_plan.store(true, Ordering::SeqCst);
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user);

        let result = gateway(&store, &provider)
            .change_plan(user_id, PLAN_PATHFINDER, "upgrade", Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(BillingError::Consistency(_))));
        // The provider call did happen; the divergence is real.
        assert!(!provider.calls().is_empty());
        assert!(store.actions().is_empty());
    }

    #[tokio::test]
    async fn refund_without_customer_id_makes_no_provider_call() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let mut user = user_fixture();
        user.stripe_customer_id = None;
        let user_id = user.id;
        store.insert_user(user);

        let result = gateway(&store, &provider)
            .process_refund(user_id, 1000, "duplicate charge", Uuid::new_v4())
            .await;

        assert!(matches!(
            result,
            Err(BillingError::MissingBillingIdentity(_, "customer"))
        ));
        assert!(provider.calls().is_empty());
        assert!(store.refunds().is_empty());
    }

    #[tokio::test]
    async fn refund_records_detail_row_and_skips_subscription_fields() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user.clone());

        let outcome = gateway(&store, &provider)
            .process_refund(user_id, 1500, "service outage credit", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.amount_cents, 1500);
        let refunds = store.refunds();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount_cents, 1500);

        // Subscription fields untouched.
        let after = store.user(user_id);
        assert_eq!(after.subscription_plan, user.subscription_plan);
        assert_eq!(after.subscription_status, user.subscription_status);
    }

    #[tokio::test]
    async fn refund_provider_failure_writes_no_audit() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        provider.fail_refund.store(true, Ordering::SeqCst);
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user);

        let result = gateway(&store, &provider)
            .process_refund(user_id, 1000, "duplicate charge", Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(BillingError::StripeApi(_))));
        assert!(store.actions().is_empty());
        assert!(store.refunds().is_empty());
    }

    #[tokio::test]
    async fn refund_larger_than_last_charge_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user);

        // Mock charge is 4900 cents.
        let result = gateway(&store, &provider)
            .process_refund(user_id, 10_000, "too much", Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert!(
            !provider
                .calls()
                .iter()
                .any(|c| matches!(c, ProviderCall::CreateRefund { .. })),
            "no refund attempted"
        );
    }

    #[tokio::test]
    async fn update_billing_merges_and_never_touches_login_email() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let mut user = user_fixture();
        user.billing_name = Some("Old Name".to_string());
        user.billing_phone = Some("+1-555-0100".to_string());
        let user_id = user.id;
        let login_email = user.email.clone();
        store.insert_user(user);

        let update = BillingProfile {
            billing_name: Some("New Name".to_string()),
            billing_email: Some("invoices@claim.example".to_string()),
            billing_phone: None,
            billing_address: None,
        };

        let outcome = gateway(&store, &provider)
            .update_billing(user_id, &update, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome.profile.billing_name.as_deref(), Some("New Name"));
        // Unspecified fields keep their values.
        assert_eq!(outcome.profile.billing_phone.as_deref(), Some("+1-555-0100"));

        let user = store.user(user_id);
        assert_eq!(user.email, login_email);
        assert_eq!(
            user.billing_email.as_deref(),
            Some("invoices@claim.example")
        );
        assert_eq!(store.actions().len(), 1);
        assert_eq!(store.actions()[0].action.action_type, "billing_update");
    }

    #[tokio::test]
    async fn empty_billing_update_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let user = user_fixture();
        let user_id = user.id;
        store.insert_user(user);

        let result = gateway(&store, &provider)
            .update_billing(user_id, &BillingProfile::default(), Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert!(provider.calls().is_empty());
    }
}
