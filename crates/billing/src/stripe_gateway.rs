//! Stripe-backed implementation of the provider port
//!
//! Every call runs under the configured deadline. Reads and idempotent
//! updates retry a small bounded number of times on transient failures;
//! refund creation never retries, since a second attempt after an ambiguous
//! timeout could refund twice.

use std::time::Duration;

use async_trait::async_trait;
use paydirt_shared::BillingProfile;
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    CreateRefund, Customer, Invoice, Refund, RefundReasonFilter, Subscription, UpdateCustomer,
    UpdateSubscription, UpdateSubscriptionItems,
};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::provider::{BillingProvider, ProviderCharge, ProviderRefund, ProviderSubscription};

/// Total attempts for retryable calls (1 initial + 2 retries).
const RETRYABLE_ATTEMPTS: usize = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;

pub struct StripeGateway {
    client: StripeClient,
    request_timeout: Duration,
}

impl StripeGateway {
    pub fn new(client: StripeClient) -> Self {
        let request_timeout = client.config().request_timeout;
        Self {
            client,
            request_timeout,
        }
    }

    /// 5xx/429 and connection-level failures may succeed on a retry;
    /// validation-class provider responses (4xx) never will.
    fn is_transient(err: &CallError) -> bool {
        match err {
            CallError::Timeout => true,
            CallError::Stripe(stripe::StripeError::Stripe(req)) => {
                req.http_status >= 500 || req.http_status == 429
            }
            CallError::Stripe(stripe::StripeError::ClientError(_)) => true,
            CallError::Stripe(stripe::StripeError::Timeout) => true,
            CallError::Stripe(_) => false,
        }
    }

    /// Run one attempt under the deadline.
    async fn attempt<T, Fut>(&self, fut: Fut) -> Result<T, CallError>
    where
        Fut: std::future::Future<Output = Result<T, stripe::StripeError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CallError::Stripe(err)),
            Err(_) => Err(CallError::Timeout),
        }
    }

    /// Deadline + bounded exponential backoff for idempotent calls.
    async fn call<T, F, Fut>(&self, op: &'static str, mut make: F) -> BillingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, stripe::StripeError>>,
    {
        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .map(jitter)
            .take(RETRYABLE_ATTEMPTS - 1);

        RetryIf::spawn(
            strategy,
            || self.attempt(make()),
            |err: &CallError| {
                let transient = Self::is_transient(err);
                if transient {
                    tracing::warn!(op = op, error = %err, "Transient Stripe failure, retrying");
                }
                transient
            },
        )
        .await
        .map_err(|err| err.into_billing(op, self.request_timeout))
    }

    /// Deadline only, single attempt. For non-idempotent mutations.
    async fn call_once<T, Fut>(&self, op: &'static str, fut: Fut) -> BillingResult<T>
    where
        Fut: std::future::Future<Output = Result<T, stripe::StripeError>>,
    {
        self.attempt(fut)
            .await
            .map_err(|err| err.into_billing(op, self.request_timeout))
    }
}

#[async_trait]
impl BillingProvider for StripeGateway {
    async fn replace_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let sub_id: stripe::SubscriptionId = subscription_id
            .parse()
            .map_err(|e| BillingError::Validation(format!("invalid subscription id: {e}")))?;

        let current = self
            .call("retrieve_subscription", || {
                Subscription::retrieve(self.client.inner(), &sub_id, &[])
            })
            .await?;

        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| {
                BillingError::Internal(format!("subscription {subscription_id} has no items"))
            })?;

        let subscription = self
            .call("update_subscription", || {
                let params = UpdateSubscription {
                    items: Some(vec![UpdateSubscriptionItems {
                        id: Some(item_id.clone()),
                        price: Some(price_id.to_string()),
                        ..Default::default()
                    }]),
                    // Charge the prorated difference for the current period.
                    proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
                    ..Default::default()
                };
                Subscription::update(self.client.inner(), &sub_id, params)
            })
            .await?;

        Ok(ProviderSubscription {
            id: subscription.id.to_string(),
            status: subscription.status.as_str().to_string(),
            current_period_start: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_start,
            )
            .ok(),
            current_period_end: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_end,
            )
            .ok(),
        })
    }

    async fn latest_paid_charge(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<ProviderCharge>> {
        let customer: stripe::CustomerId = customer_id
            .parse()
            .map_err(|e| BillingError::Validation(format!("invalid customer id: {e}")))?;

        let mut params = stripe::ListInvoices::new();
        params.customer = Some(customer);
        params.status = Some(stripe::InvoiceStatus::Paid);
        params.limit = Some(1);

        let invoices = self
            .call("list_paid_invoices", || {
                Invoice::list(self.client.inner(), &params)
            })
            .await?;

        let Some(invoice) = invoices.data.into_iter().next() else {
            return Ok(None);
        };

        let Some(charge_id) = invoice.charge.as_ref().map(|c| match c {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(charge) => charge.id.to_string(),
        }) else {
            return Ok(None);
        };

        let created_at = OffsetDateTime::from_unix_timestamp(invoice.created.unwrap_or(0))
            .map_err(|_| BillingError::Internal("invalid invoice timestamp".to_string()))?;

        Ok(Some(ProviderCharge {
            charge_id,
            invoice_id: invoice.id.to_string(),
            amount_cents: invoice.amount_paid.unwrap_or(0),
            created_at,
        }))
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        reason: &str,
    ) -> BillingResult<ProviderRefund> {
        let mut params = CreateRefund::new();
        params.charge = Some(
            charge_id
                .parse()
                .map_err(|e| BillingError::Validation(format!("invalid charge id: {e}")))?,
        );
        params.amount = Some(amount_cents);
        params.reason = Some(RefundReasonFilter::RequestedByCustomer);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("admin_refund".to_string(), "true".to_string());
        metadata.insert("reason".to_string(), reason.to_string());
        params.metadata = Some(metadata);

        let refund = self
            .call_once("create_refund", Refund::create(self.client.inner(), params))
            .await?;

        Ok(ProviderRefund {
            id: refund.id.to_string(),
            amount_cents,
            status: refund
                .status
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| "pending".to_string()),
        })
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        profile: &BillingProfile,
    ) -> BillingResult<()> {
        let cus_id: stripe::CustomerId = customer_id
            .parse()
            .map_err(|e| BillingError::Validation(format!("invalid customer id: {e}")))?;

        self.call("update_customer", || {
            let mut params = UpdateCustomer::new();
            params.name = profile.billing_name.as_deref();
            params.email = profile.billing_email.as_deref();
            params.phone = profile.billing_phone.as_deref();
            if let Some(address) = profile.billing_address.as_deref() {
                params.address = Some(stripe::Address {
                    line1: Some(address.to_string()),
                    ..Default::default()
                });
            }
            Customer::update(self.client.inner(), &cus_id, params)
        })
        .await?;

        Ok(())
    }
}

/// Per-attempt failure, kept separate so the retry predicate can classify
/// without consuming the error.
enum CallError {
    Stripe(stripe::StripeError),
    Timeout,
}

impl CallError {
    fn into_billing(self, op: &'static str, timeout: Duration) -> BillingError {
        match self {
            CallError::Timeout => {
                tracing::error!(op = op, timeout = ?timeout, "Stripe call timed out");
                BillingError::ProviderTimeout(timeout)
            }
            CallError::Stripe(err) => {
                tracing::error!(op = op, error = %err, "Stripe call failed");
                BillingError::StripeApi(err.to_string())
            }
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Stripe(err) => write!(f, "{err}"),
            CallError::Timeout => write!(f, "deadline exceeded"),
        }
    }
}
