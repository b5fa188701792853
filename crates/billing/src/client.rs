//! Stripe client handle and configuration
//!
//! One `StripeClient` is constructed at startup and passed into every
//! component that talks to Stripe. Nothing in this crate reaches for a
//! global client.

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

/// Default deadline for a single Stripe API call.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Price identifiers for the plans Paydirt sells.
///
/// The promo prices are the discounted Prospector pricing the early cohorts
/// bought in at; a subscription schedule releases each of them onto the
/// standard price when the promo window closes.
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub prospector: String,
    pub pathfinder: String,
    pub mother_lode: String,
    pub founding_member: Option<String>,
    pub early_adopter: Option<String>,
    pub beta_tester: Option<String>,
    pub one_week_trial: Option<String>,
}

/// Stripe configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub request_timeout: Duration,
    pub prices: PriceIds,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;

        let prices = PriceIds {
            prospector: require_env("STRIPE_PRICE_PROSPECTOR")?,
            pathfinder: require_env("STRIPE_PRICE_PATHFINDER")?,
            mother_lode: require_env("STRIPE_PRICE_MOTHER_LODE")?,
            founding_member: std::env::var("STRIPE_PRICE_FOUNDING_MEMBER").ok(),
            early_adopter: std::env::var("STRIPE_PRICE_EARLY_ADOPTER").ok(),
            beta_tester: std::env::var("STRIPE_PRICE_BETA_TESTER").ok(),
            one_week_trial: std::env::var("STRIPE_PRICE_ONE_WEEK_TRIAL").ok(),
        };

        let request_timeout = std::env::var("STRIPE_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        Ok(Self {
            secret_key,
            webhook_secret,
            request_timeout,
            prices,
        })
    }
}

fn require_env(name: &'static str) -> BillingResult<String> {
    std::env::var(name)
        .map_err(|_| BillingError::Internal(format!("{name} must be set")))
        .and_then(|v| {
            if v.is_empty() {
                Err(BillingError::Internal(format!("{name} must not be empty")))
            } else {
                Ok(v)
            }
        })
}

/// Cheap-to-clone handle around the async-stripe client plus our config.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
