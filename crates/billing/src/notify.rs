//! Notification collaborator
//!
//! Billing transitions trigger fire-and-forget emails. The owning operation
//! never depends on the outcome: callers log a failed send and move on.

use async_trait::async_trait;
use serde_json::json;

use crate::error::{BillingError, BillingResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// A staged promo price was released onto the standard plan price.
    async fn send_plan_upgraded(&self, email: &str, plan: &str) -> BillingResult<()>;

    /// A time-bounded promo reached its expiration date.
    async fn send_promo_expired(&self, email: &str, plan: Option<&str>) -> BillingResult<()>;

    /// An invoice payment attempt failed.
    async fn send_payment_failed(&self, email: &str, amount_cents: i64) -> BillingResult<()>;
}

/// Resend-backed sender. Unconfigured deployments (no RESEND_API_KEY) get a
/// no-op sender that logs what it would have sent.
#[derive(Clone)]
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from_address: String,
}

impl ResendNotifier {
    pub fn from_env() -> Self {
        let api_key = std::env::var("RESEND_API_KEY").unwrap_or_default();
        let from_address = std::env::var("BILLING_FROM_ADDRESS")
            .unwrap_or_else(|_| "Paydirt Billing <billing@paydirt.app>".to_string());

        Self {
            client: reqwest::Client::new(),
            api_key,
            from_address,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> BillingResult<()> {
        if !self.is_enabled() {
            tracing::debug!(to = to, subject = subject, "Email disabled, skipping send");
            return Ok(());
        }

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from_address,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .map_err(|e| BillingError::Internal(format!("email send failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Internal(format!(
                "email send rejected: {status} {body}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSender for ResendNotifier {
    async fn send_plan_upgraded(&self, email: &str, plan: &str) -> BillingResult<()> {
        let html = format!(
            "<p>Your promotional pricing has ended and your subscription is now on the \
             <strong>{plan}</strong> plan at its standard price. Thanks for being with us \
             from the start.</p>"
        );
        self.send(email, "Your Paydirt plan has been updated", &html)
            .await
    }

    async fn send_promo_expired(&self, email: &str, plan: Option<&str>) -> BillingResult<()> {
        let plan = plan.unwrap_or("your current");
        let html = format!(
            "<p>Your promotional period has ended. Your subscription continues on the \
             {plan} plan at its standard price.</p>"
        );
        self.send(email, "Your Paydirt promotional period has ended", &html)
            .await
    }

    async fn send_payment_failed(&self, email: &str, amount_cents: i64) -> BillingResult<()> {
        let html = format!(
            "<p>We were unable to collect your latest payment of ${:.2}. Please update \
             your payment method to keep your subscription active.</p>",
            amount_cents as f64 / 100.0
        );
        self.send(email, "Payment failed for your Paydirt subscription", &html)
            .await
    }
}
