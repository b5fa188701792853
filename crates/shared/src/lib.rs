// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paydirt Shared Types
//!
//! Cross-crate building blocks: promo cohort types, subscription status
//! helpers, and database pool/migration plumbing.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{BillingProfile, PromoType};
