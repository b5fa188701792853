//! Billing error taxonomy
//!
//! Every failure class has a distinct variant so callers can decide what is
//! retryable, what is a precondition failure, and what needs an operator.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed or unacceptable input; returned before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Target user does not exist.
    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    /// The user row is missing a required external identifier, so the
    /// operation cannot even be attempted against the provider.
    #[error("user {0} has no {1} on file")]
    MissingBillingIdentity(Uuid, &'static str),

    /// Plan name with no catalog entry.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// No refundable charge exists for the customer.
    #[error("no refundable charge found for customer {0}")]
    NoRefundableCharge(String),

    /// Webhook signature header missing, malformed, expired, or wrong.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// Webhook body could not be parsed into a known shape.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// The provider rejected or failed the call. Transient-class failures
    /// are retried by the gateway before this surfaces.
    #[error("stripe api error: {0}")]
    StripeApi(String),

    /// The provider call did not complete within the configured deadline.
    /// Treated as failure: no internal mutation follows.
    #[error("stripe call timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// The external mutation succeeded but the internal write did not.
    /// The two systems diverge until the next reconciling event; this is
    /// alert-worthy and never auto-retried.
    #[error("consistency window opened: {0}")]
    Consistency(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Internal(format!("serialization failed: {err}"))
    }
}

impl BillingError {
    /// Precondition failures: nothing was attempted, nothing changed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            BillingError::Validation(_)
                | BillingError::UserNotFound(_)
                | BillingError::MissingBillingIdentity(..)
                | BillingError::UnknownPlan(_)
                | BillingError::NoRefundableCharge(_)
        )
    }
}
