//! Stripe webhook ingress
//!
//! Status codes are the whole contract with the provider: 200 acknowledges
//! (including duplicates - never trigger a redelivery for those), 400 marks
//! the payload unprocessable, 5xx requests redelivery.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use paydirt_billing::events;
use serde_json::json;

use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!("Webhook rejected: missing stripe-signature header");
        return (StatusCode::BAD_REQUEST, "Missing stripe-signature header").into_response();
    };

    if events::verify_signature(&body, signature, state.billing.webhook_secret()).is_err() {
        tracing::warn!("Webhook rejected: signature verification failed");
        return (StatusCode::BAD_REQUEST, "Invalid signature").into_response();
    }

    let envelope: events::WebhookEnvelope = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "Webhook rejected: unparseable body");
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    let event_id = envelope.id.clone();
    let event_type = envelope.event_type.clone();

    let event = match events::normalize(&envelope) {
        Ok(Some(event)) => event,
        Ok(None) => {
            // Unhandled type: acknowledge so Stripe stops resending it.
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Unhandled event type acknowledged without effect"
            );
            return (StatusCode::OK, Json(json!({"received": true}))).into_response();
        }
        Err(e) => {
            tracing::warn!(event_id = %event_id, error = %e, "Webhook rejected: malformed payload");
            return (StatusCode::BAD_REQUEST, "Malformed payload").into_response();
        }
    };

    match state.billing.reconciler.reconcile(&event).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({"received": true, "outcome": outcome.as_str()})),
        )
            .into_response(),
        Err(e) => {
            // Transient internal failure: 5xx asks the provider to redeliver.
            tracing::error!(
                event_id = %event_id,
                event_type = %event_type,
                error = %e,
                "Webhook processing failed, requesting redelivery"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed").into_response()
        }
    }
}
