//! Promo lifecycle tracker
//!
//! Owns the promo fields on the user row. `end` is the single mutation
//! point for closing a promo and is idempotent: the `promo_active` flag is
//! the only fence, so the schedule-release webhook and the expiration
//! sweeper can both race to close the same promo and exactly one wins.

use std::sync::Arc;

use paydirt_shared::PromoType;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::UserStore;

/// Fixed promo durations per cohort.
pub fn duration_for(promo_type: PromoType) -> Duration {
    match promo_type {
        PromoType::FoundingMember => Duration::days(365),
        PromoType::EarlyAdopter => Duration::days(180),
        PromoType::BetaTester => Duration::days(90),
        PromoType::OneWeekTrial => Duration::days(7),
    }
}

/// Expiration for a promo purchased at `purchase_date`.
pub fn expiration_for(promo_type: PromoType, purchase_date: OffsetDateTime) -> OffsetDateTime {
    purchase_date + duration_for(promo_type)
}

#[derive(Clone)]
pub struct PromoTracker {
    users: Arc<dyn UserStore>,
}

impl PromoTracker {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Enroll a user in a promo cohort, computing the expiration from the
    /// fixed duration table.
    pub async fn activate(
        &self,
        user_id: Uuid,
        promo_type: PromoType,
        purchase_date: OffsetDateTime,
    ) -> BillingResult<OffsetDateTime> {
        let expires_at = expiration_for(promo_type, purchase_date);
        self.users
            .activate_promo(user_id, promo_type, expires_at)
            .await?;

        tracing::info!(
            user_id = %user_id,
            promo_type = %promo_type,
            expires_at = %expires_at,
            "Promo activated"
        );

        Ok(expires_at)
    }

    /// Close a promo. Returns `true` when this call performed the
    /// transition; `false` means another writer already ended it and the
    /// caller must not repeat side effects (notifications).
    pub async fn end(&self, user_id: Uuid, reason: &str) -> BillingResult<bool> {
        let ended = self.users.end_promo(user_id).await?;

        if ended {
            tracing::info!(user_id = %user_id, reason = reason, "Promo ended");
        } else {
            tracing::debug!(
                user_id = %user_id,
                reason = reason,
                "Promo already inactive, nothing to do"
            );
        }

        Ok(ended)
    }
}
