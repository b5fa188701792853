//! Postgres implementation of the persistence ports

use async_trait::async_trait;
use paydirt_shared::{BillingProfile, PromoType};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::{
    AuditStore, EventLedger, NewAdminAction, NewPlanChange, NewRefund, PlanFields, SyncUpdate,
    UserRecord, UserStore,
};

const USER_COLUMNS: &str = r#"
    id, email, stripe_customer_id, stripe_subscription_id, stripe_schedule_id,
    subscription_plan, subscription_status, current_period_start, current_period_end,
    promo_active, promo_type, promo_expiration_date,
    billing_name, billing_email, billing_phone, billing_address,
    last_sync_at, updated_at
"#;

/// Production store backed by the shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLedger for PgStore {
    async fn admit(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        occurred_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        // The unique constraint on stripe_event_id makes this the atomic
        // claim: exactly one concurrent caller gets rows_affected == 1.
        let result = sqlx::query(
            r#"
            INSERT INTO stripe_webhook_events (stripe_event_id, event_type, payload, occurred_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (stripe_event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_billing_ids(
        &self,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> BillingResult<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE ($1::TEXT IS NOT NULL AND stripe_customer_id = $1)
               OR ($2::TEXT IS NOT NULL AND stripe_subscription_id = $2)
            LIMIT 1
            "#
        ))
        .bind(customer_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn apply_sync(&self, user_id: Uuid, update: &SyncUpdate) -> BillingResult<bool> {
        // Single fenced UPDATE: either every field lands together with the
        // new last_sync_at, or (stale event) nothing does.
        let result = sqlx::query(
            r#"
            UPDATE users SET
                subscription_plan = COALESCE($2, subscription_plan),
                subscription_status = COALESCE($3, subscription_status),
                stripe_schedule_id = COALESCE($4, stripe_schedule_id),
                current_period_start = COALESCE($5, current_period_start),
                current_period_end = COALESCE($6, current_period_end),
                last_sync_at = $7,
                updated_at = NOW()
            WHERE id = $1
              AND (last_sync_at IS NULL OR last_sync_at <= $7)
            "#,
        )
        .bind(user_id)
        .bind(update.plan.as_deref())
        .bind(update.status.as_deref())
        .bind(update.schedule_id.as_deref())
        .bind(update.period_start)
        .bind(update.period_end)
        .bind(update.event_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_plan(&self, user_id: Uuid, fields: &PlanFields) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                subscription_plan = $2,
                subscription_status = $3,
                current_period_start = COALESCE($4, current_period_start),
                current_period_end = COALESCE($5, current_period_end),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(&fields.plan)
        .bind(&fields.status)
        .bind(fields.period_start)
        .bind(fields.period_end)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_billing_profile(
        &self,
        user_id: Uuid,
        profile: &BillingProfile,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                billing_name = $2,
                billing_email = $3,
                billing_phone = $4,
                billing_address = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(profile.billing_name.as_deref())
        .bind(profile.billing_email.as_deref())
        .bind(profile.billing_phone.as_deref())
        .bind(profile.billing_address.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn activate_promo(
        &self,
        user_id: Uuid,
        promo_type: PromoType,
        expires_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                promo_active = TRUE,
                promo_type = $2,
                promo_expiration_date = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(promo_type.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn end_promo(&self, user_id: Uuid) -> BillingResult<bool> {
        // promo_type / promo_expiration_date stay behind as history.
        let result = sqlx::query(
            r#"
            UPDATE users SET promo_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND promo_active = TRUE
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expired_promos(&self, now: OffsetDateTime) -> BillingResult<Vec<UserRecord>> {
        let users = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE promo_active = TRUE AND promo_expiration_date <= $1
            ORDER BY promo_expiration_date
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn record_action(&self, action: &NewAdminAction) -> BillingResult<Uuid> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO admin_actions (
                admin_id, target_user_id, action_type,
                old_value, new_value, reason, external_object_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(action.admin_id)
        .bind(action.target_user_id)
        .bind(action.action_type)
        .bind(&action.old_value)
        .bind(&action.new_value)
        .bind(&action.reason)
        .bind(action.external_object_id.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn record_plan_change(&self, change: &NewPlanChange) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO plan_changes (
                admin_action_id, user_id, from_plan, to_plan, stripe_subscription_id
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(change.admin_action_id)
        .bind(change.user_id)
        .bind(change.from_plan.as_deref())
        .bind(&change.to_plan)
        .bind(&change.stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_refund(&self, refund: &NewRefund) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refunds (
                admin_action_id, user_id, stripe_refund_id,
                stripe_charge_id, amount_cents, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(refund.admin_action_id)
        .bind(refund.user_id)
        .bind(&refund.stripe_refund_id)
        .bind(&refund.stripe_charge_id)
        .bind(refund.amount_cents)
        .bind(&refund.reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
