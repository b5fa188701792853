//! API error type and HTTP mapping
//!
//! Admin endpoints surface the specific failure reason; the webhook endpoint
//! communicates retry-worthiness through the status code alone.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use paydirt_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid webhook request: {0}")]
    BadWebhook(String),

    /// The billing provider rejected or failed the call.
    #[error("provider error: {0}")]
    Upstream(String),

    /// Provider mutation succeeded but the internal write failed. Alert-
    /// worthy: the caller sees a distinct error class, not a generic 500.
    #[error("consistency window: {0}")]
    Consistency(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadWebhook(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Consistency(_) | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadWebhook(_) => "bad_webhook",
            ApiError::Upstream(_) => "provider_error",
            ApiError::Consistency(_) => "consistency_error",
            ApiError::Database(_) => "database_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::UnknownPlan(_) => ApiError::Validation(err.to_string()),
            BillingError::UserNotFound(_)
            | BillingError::MissingBillingIdentity(..)
            | BillingError::NoRefundableCharge(_) => ApiError::NotFound(err.to_string()),
            BillingError::WebhookSignatureInvalid | BillingError::MalformedPayload(_) => {
                ApiError::BadWebhook(err.to_string())
            }
            BillingError::StripeApi(_) | BillingError::ProviderTimeout(_) => {
                ApiError::Upstream(err.to_string())
            }
            BillingError::Consistency(msg) => ApiError::Consistency(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
