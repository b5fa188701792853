//! State reconciler
//!
//! Applies a normalized provider event to the canonical user row. The flow
//! is: admit into the ledger (exactly-once boundary), resolve the target
//! user, map the price through the catalog, then perform one timestamp-
//! fenced write. Promo transitions and notifications hang off the fenced
//! write so stale or duplicate deliveries can never repeat them.

use std::sync::Arc;

use crate::catalog::PlanCatalog;
use crate::error::BillingResult;
use crate::events::{EventKind, NormalizedEvent};
use crate::notify::NotificationSender;
use crate::promo::PromoTracker;
use crate::store::{EventLedger, SyncUpdate, UserRecord, UserStore};

/// What a reconcile call did. Every variant is a success from the
/// provider's point of view: only infrastructure errors surface as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Fields were applied to the user row.
    Applied,
    /// Event id already in the ledger; nothing done.
    Duplicate,
    /// No user matches the event's customer/subscription ids. The event is
    /// ledgered for dedupe but produces no mutation.
    Orphan,
    /// Event is older than the row's last_sync_at; ledgered, discarded.
    Stale,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::Orphan => "orphan",
            ReconcileOutcome::Stale => "stale",
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn EventLedger>,
    users: Arc<dyn UserStore>,
    promos: PromoTracker,
    catalog: Arc<PlanCatalog>,
    notifier: Arc<dyn NotificationSender>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        users: Arc<dyn UserStore>,
        promos: PromoTracker,
        catalog: Arc<PlanCatalog>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            ledger,
            users,
            promos,
            catalog,
            notifier,
        }
    }

    pub async fn reconcile(&self, event: &NormalizedEvent) -> BillingResult<ReconcileOutcome> {
        // Admission first: if this write fails nothing downstream runs, and
        // the provider's redelivery gets a clean retry.
        let payload = serde_json::to_value(event)?;
        let admitted = self
            .ledger
            .admit(&event.event_id, event.kind.as_str(), &payload, event.occurred_at)
            .await?;

        if !admitted {
            tracing::info!(
                event_id = %event.event_id,
                event_kind = %event.kind,
                "Duplicate event id, already processed"
            );
            return Ok(ReconcileOutcome::Duplicate);
        }

        let user = self
            .users
            .find_by_billing_ids(
                event.customer_id.as_deref(),
                event.subscription_id.as_deref(),
            )
            .await?;

        let Some(user) = user else {
            tracing::warn!(
                event_id = %event.event_id,
                customer_id = ?event.customer_id,
                subscription_id = ?event.subscription_id,
                "Orphan event: no matching user"
            );
            return Ok(ReconcileOutcome::Orphan);
        };

        let plan = event.price_id.as_deref().and_then(|price_id| {
            match self.catalog.plan_for_price(price_id) {
                Some(plan) => Some(plan.to_string()),
                None => {
                    // Catalog gap: degrade to "plan unchanged" and leave a
                    // trail for operator follow-up.
                    tracing::warn!(
                        event_id = %event.event_id,
                        price_id = price_id,
                        "Price id has no catalog entry, leaving plan unchanged"
                    );
                    None
                }
            }
        });

        let update = SyncUpdate {
            plan,
            status: event.status.clone(),
            schedule_id: event.schedule_id.clone(),
            period_start: event.period_start,
            period_end: event.period_end,
            event_time: event.occurred_at,
        };

        if !self.users.apply_sync(user.id, &update).await? {
            tracing::info!(
                event_id = %event.event_id,
                user_id = %user.id,
                event_time = %event.occurred_at,
                "Stale event discarded by last_sync_at fence"
            );
            return Ok(ReconcileOutcome::Stale);
        }

        match event.kind {
            EventKind::SubscriptionCreated => {
                self.maybe_enroll_promo(&user, event).await?;
            }
            EventKind::ScheduleReleased if user.promo_active => {
                self.handle_promo_release(&user, update.plan.as_deref()).await?;
            }
            EventKind::InvoiceFailed => {
                let amount = event.amount_cents.unwrap_or(0);
                if let Err(e) = self.notifier.send_payment_failed(&user.email, amount).await {
                    tracing::warn!(
                        user_id = %user.id,
                        error = %e,
                        "Failed to send payment failed notification"
                    );
                }
            }
            _ => {}
        }

        tracing::info!(
            event_id = %event.event_id,
            event_kind = %event.kind,
            user_id = %user.id,
            "Event applied"
        );

        Ok(ReconcileOutcome::Applied)
    }

    /// A subscription created on promotional pricing enrolls its cohort's
    /// promo, with the expiration clock starting at the event time.
    async fn maybe_enroll_promo(
        &self,
        user: &UserRecord,
        event: &NormalizedEvent,
    ) -> BillingResult<()> {
        let Some(promo_type) = event
            .price_id
            .as_deref()
            .and_then(|price_id| self.catalog.promo_for_price(price_id))
        else {
            return Ok(());
        };

        if user.promo_active {
            tracing::debug!(user_id = %user.id, "Promo already active, not re-enrolling");
            return Ok(());
        }

        self.promos
            .activate(user.id, promo_type, event.occurred_at)
            .await?;

        Ok(())
    }

    /// A subscription schedule released a promo onto standard pricing: end
    /// the promo and tell the user, once.
    async fn handle_promo_release(
        &self,
        user: &UserRecord,
        new_plan: Option<&str>,
    ) -> BillingResult<()> {
        let ended = self.promos.end(user.id, "schedule_released").await?;
        if !ended {
            return Ok(());
        }

        let plan = new_plan
            .or(user.subscription_plan.as_deref())
            .unwrap_or(crate::catalog::PLAN_PROSPECTOR);

        if let Err(e) = self.notifier.send_plan_upgraded(&user.email, plan).await {
            tracing::warn!(
                user_id = %user.id,
                error = %e,
                "Failed to send plan upgrade notification"
            );
        }

        Ok(())
    }
}
