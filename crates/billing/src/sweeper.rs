//! Promo expiration sweeper
//!
//! Scheduled batch job closing promos whose expiration has passed. Rows are
//! processed independently: a failure leaves that row `promo_active = TRUE`
//! and eligible for the next sweep, and never blocks the rest of the batch.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::notify::NotificationSender;
use crate::promo::PromoTracker;
use crate::store::UserStore;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepSummary {
    /// Rows matching the expiration predicate at scan time.
    pub scanned: usize,
    /// Rows this sweep transitioned out of their promo.
    pub transitioned: usize,
    /// Rows left active for the next sweep after an error.
    pub failed: usize,
}

#[derive(Clone)]
pub struct PromoSweeper {
    users: Arc<dyn UserStore>,
    promos: PromoTracker,
    notifier: Arc<dyn NotificationSender>,
}

impl PromoSweeper {
    pub fn new(
        users: Arc<dyn UserStore>,
        promos: PromoTracker,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            users,
            promos,
            notifier,
        }
    }

    /// Close every promo expired as of `now`. Safe at any cadence: `end` is
    /// idempotent per row, so overlapping sweeps cannot double-transition
    /// or double-notify.
    pub async fn sweep(&self, now: OffsetDateTime) -> BillingResult<SweepSummary> {
        let candidates = self.users.expired_promos(now).await?;

        let mut summary = SweepSummary {
            scanned: candidates.len(),
            ..Default::default()
        };

        for user in candidates {
            match self.promos.end(user.id, "expired").await {
                Ok(true) => {
                    summary.transitioned += 1;
                    if let Err(e) = self
                        .notifier
                        .send_promo_expired(&user.email, user.subscription_plan.as_deref())
                        .await
                    {
                        tracing::warn!(
                            user_id = %user.id,
                            error = %e,
                            "Failed to send promo expired notification"
                        );
                    }
                }
                Ok(false) => {
                    // Another writer (webhook or concurrent sweep) got here
                    // first; their side effects, not ours.
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        user_id = %user.id,
                        error = %e,
                        "Failed to end expired promo, will retry next sweep"
                    );
                }
            }
        }

        tracing::info!(
            scanned = summary.scanned,
            transitioned = summary.transitioned,
            failed = summary.failed,
            "Promo expiration sweep complete"
        );

        Ok(summary)
    }
}
