// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paydirt Billing Engine
//!
//! Keeps the canonical user record consistent with Stripe and owns the
//! promotional lifecycle.
//!
//! ## Features
//!
//! - **Event Ledger**: exactly-once admission of provider-pushed events
//! - **State Reconciler**: timestamp-fenced sync of subscription state
//! - **Promo Lifecycle**: time-bounded promo activation and idempotent close
//! - **Admin Overrides**: plan changes, refunds, billing profile edits with
//!   a full audit trail
//! - **Expiration Sweeper**: scheduled batch close of lapsed promos
//! - **Webhooks**: signature verification and payload normalization

pub mod admin;
pub mod catalog;
pub mod client;
pub mod error;
pub mod events;
pub mod notify;
pub mod postgres;
pub mod promo;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod stripe_gateway;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

// Admin gateway
pub use admin::{AdminGateway, BillingUpdateOutcome, PlanChangeOutcome, RefundOutcome};

// Catalog
pub use catalog::{PlanCatalog, PlanEntry, PLAN_MOTHER_LODE, PLAN_PATHFINDER, PLAN_PROSPECTOR};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{normalize, verify_signature, EventKind, NormalizedEvent, WebhookEnvelope};

// Notifications
pub use notify::{NotificationSender, ResendNotifier};

// Promo lifecycle
pub use promo::PromoTracker;

// Provider
pub use provider::{BillingProvider, ProviderCharge, ProviderRefund, ProviderSubscription};

// Reconciler
pub use reconcile::{ReconcileOutcome, Reconciler};

// Store
pub use postgres::PgStore;
pub use store::{AuditStore, EventLedger, UserRecord, UserStore};

// Stripe gateway
pub use stripe_gateway::StripeGateway;

// Sweeper
pub use sweeper::{PromoSweeper, SweepSummary};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service combining the engine's components, wired once at
/// startup and shared through application state.
#[derive(Clone)]
pub struct BillingService {
    pub reconciler: Reconciler,
    pub admin: AdminGateway,
    pub sweeper: PromoSweeper,
    pub promos: PromoTracker,
    pub catalog: Arc<PlanCatalog>,
    webhook_secret: String,
}

impl BillingService {
    /// Create a billing service from environment variables.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config, pool))
    }

    /// Create a billing service with explicit config.
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        let provider = Arc::new(StripeGateway::new(StripeClient::new(config.clone())));
        let notifier = Arc::new(ResendNotifier::from_env());
        let catalog = Arc::new(PlanCatalog::from_price_ids(&config.prices));

        Self::with_parts(
            config.webhook_secret.clone(),
            store.clone(),
            store.clone(),
            store,
            provider,
            notifier,
            catalog,
        )
    }

    /// Wire the service from explicit ports. `new` is just the production
    /// wiring of this seam.
    pub fn with_parts(
        webhook_secret: String,
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn EventLedger>,
        audit: Arc<dyn AuditStore>,
        provider: Arc<dyn BillingProvider>,
        notifier: Arc<dyn NotificationSender>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        let promos = PromoTracker::new(users.clone());

        Self {
            reconciler: Reconciler::new(
                ledger,
                users.clone(),
                promos.clone(),
                catalog.clone(),
                notifier.clone(),
            ),
            admin: AdminGateway::new(users.clone(), audit, provider, catalog.clone()),
            sweeper: PromoSweeper::new(users, promos.clone(), notifier),
            promos,
            catalog,
            webhook_secret,
        }
    }

    /// Secret used to verify inbound webhook signatures.
    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }
}
