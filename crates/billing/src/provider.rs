//! Outbound provider port
//!
//! The admin gateway mutates the billing provider through this trait; the
//! production implementation is `StripeGateway`. Keeping the seam here lets
//! gateway behavior (abort-before-internal-write, no-call-on-precondition)
//! be verified against a recording double.

use async_trait::async_trait;
use paydirt_shared::BillingProfile;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Provider view of a subscription after a mutation.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
}

/// A charge eligible for refund.
#[derive(Debug, Clone)]
pub struct ProviderCharge {
    pub charge_id: String,
    pub invoice_id: String,
    pub amount_cents: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ProviderRefund {
    pub id: String,
    pub amount_cents: i64,
    pub status: String,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Replace the subscription's single item price, prorating the
    /// difference for the current period.
    async fn replace_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription>;

    /// Most recent successfully-paid charge for the customer, if any.
    async fn latest_paid_charge(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<ProviderCharge>>;

    /// Refund part or all of a charge back to the payment method.
    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        reason: &str,
    ) -> BillingResult<ProviderRefund>;

    /// Push billing profile fields onto the provider's customer object.
    async fn update_customer(
        &self,
        customer_id: &str,
        profile: &BillingProfile,
    ) -> BillingResult<()>;
}
