//! Webhook ingress: signature verification and event normalization
//!
//! Stripe pushes loosely-shaped JSON; everything downstream of this module
//! works with a closed set of normalized variants instead. Unrecognized
//! event types normalize to `None` and are acknowledged without effect so a
//! new provider event can never crash the ingress.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a signed webhook, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Raw webhook body as Stripe sends it: `{id, type, created, data:{object}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

/// The handled event types, one variant per provider event we act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CheckoutCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoiceFailed,
    ScheduleReleased,
}

impl EventKind {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "checkout.session.completed" => Some(EventKind::CheckoutCompleted),
            "customer.subscription.created" => Some(EventKind::SubscriptionCreated),
            "customer.subscription.updated" => Some(EventKind::SubscriptionUpdated),
            "customer.subscription.deleted" => Some(EventKind::SubscriptionDeleted),
            "invoice.payment_succeeded" => Some(EventKind::InvoicePaid),
            "invoice.payment_failed" => Some(EventKind::InvoiceFailed),
            "subscription_schedule.released" => Some(EventKind::ScheduleReleased),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CheckoutCompleted => "checkout_completed",
            EventKind::SubscriptionCreated => "subscription_created",
            EventKind::SubscriptionUpdated => "subscription_updated",
            EventKind::SubscriptionDeleted => "subscription_deleted",
            EventKind::InvoicePaid => "invoice_paid",
            EventKind::InvoiceFailed => "invoice_failed",
            EventKind::ScheduleReleased => "schedule_released",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated, normalized billing event carrying everything the reconciler
/// needs. The provider-assigned `occurred_at` timestamp travels with the
/// event; last-writer-wins decisions are made against it, never against
/// arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_id: String,
    pub kind: EventKind,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub schedule_id: Option<String>,
    pub status: Option<String>,
    pub price_id: Option<String>,
    pub amount_cents: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

/// Normalize a raw envelope into a tagged event.
///
/// Returns `Ok(None)` for event types we do not handle.
pub fn normalize(envelope: &WebhookEnvelope) -> BillingResult<Option<NormalizedEvent>> {
    let Some(kind) = EventKind::from_event_type(&envelope.event_type) else {
        return Ok(None);
    };

    let occurred_at = OffsetDateTime::from_unix_timestamp(envelope.created).map_err(|_| {
        BillingError::MalformedPayload(format!("invalid created timestamp {}", envelope.created))
    })?;

    let obj = &envelope.data.object;

    let event = match kind {
        EventKind::CheckoutCompleted => NormalizedEvent {
            event_id: envelope.id.clone(),
            kind,
            subscription_id: expandable_id(&obj["subscription"]),
            customer_id: expandable_id(&obj["customer"]),
            schedule_id: None,
            status: Some("active".to_string()),
            price_id: None,
            amount_cents: obj["amount_total"].as_i64(),
            period_start: None,
            period_end: None,
            occurred_at,
        },
        EventKind::SubscriptionCreated
        | EventKind::SubscriptionUpdated
        | EventKind::SubscriptionDeleted => {
            let status = if kind == EventKind::SubscriptionDeleted {
                Some("canceled".to_string())
            } else {
                obj["status"].as_str().map(str::to_string)
            };
            NormalizedEvent {
                event_id: envelope.id.clone(),
                kind,
                subscription_id: obj["id"].as_str().map(str::to_string),
                customer_id: expandable_id(&obj["customer"]),
                schedule_id: expandable_id(&obj["schedule"]),
                status,
                price_id: obj["items"]["data"][0]["price"]["id"]
                    .as_str()
                    .map(str::to_string),
                amount_cents: None,
                period_start: unix_field(&obj["current_period_start"]),
                period_end: unix_field(&obj["current_period_end"]),
                occurred_at,
            }
        }
        EventKind::InvoicePaid | EventKind::InvoiceFailed => NormalizedEvent {
            event_id: envelope.id.clone(),
            kind,
            subscription_id: expandable_id(&obj["subscription"]),
            customer_id: expandable_id(&obj["customer"]),
            schedule_id: None,
            status: Some(
                if kind == EventKind::InvoicePaid {
                    "active"
                } else {
                    "past_due"
                }
                .to_string(),
            ),
            price_id: obj["lines"]["data"][0]["price"]["id"]
                .as_str()
                .map(str::to_string),
            amount_cents: if kind == EventKind::InvoicePaid {
                obj["amount_paid"].as_i64()
            } else {
                obj["amount_due"].as_i64()
            },
            period_start: unix_field(&obj["period_start"]),
            period_end: unix_field(&obj["period_end"]),
            occurred_at,
        },
        EventKind::ScheduleReleased => NormalizedEvent {
            event_id: envelope.id.clone(),
            kind,
            subscription_id: expandable_id(&obj["subscription"]),
            customer_id: expandable_id(&obj["customer"]),
            schedule_id: obj["id"].as_str().map(str::to_string),
            // The released subscription's own update event carries the
            // authoritative status; the release itself does not change it.
            status: None,
            price_id: released_price_id(obj),
            amount_cents: None,
            period_start: None,
            period_end: None,
            occurred_at,
        },
    };

    Ok(Some(event))
}

/// Stripe "expandable" references arrive either as a bare id string or as an
/// embedded object with an `id` field.
fn expandable_id(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::to_string)
        .or_else(|| value["id"].as_str().map(str::to_string))
}

fn unix_field(value: &serde_json::Value) -> Option<OffsetDateTime> {
    value
        .as_i64()
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

/// The price the schedule released onto: the last phase's first item.
fn released_price_id(obj: &serde_json::Value) -> Option<String> {
    let phase = obj["phases"].as_array()?.last()?;
    let price = &phase["items"][0]["price"];
    expandable_id(price)
}

/// Verify a `stripe-signature` header (`t=<unix>,v1=<hex hmac>`) against the
/// raw request body.
pub fn verify_signature(payload: &str, signature: &str, secret: &str) -> BillingResult<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    verify_signature_at(payload, signature, secret, now)
}

fn verify_signature_at(
    payload: &str,
    signature: &str,
    secret: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1]),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The secret's "whsec_" prefix is not part of the signing key.
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}
