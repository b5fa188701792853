//! Plan catalog
//!
//! Static mapping between Stripe price ids and Paydirt plan names. Pure
//! lookup, no state: constructed once from config and shared behind an Arc.

use paydirt_shared::PromoType;

use crate::client::PriceIds;

pub const PLAN_PROSPECTOR: &str = "Prospector";
pub const PLAN_PATHFINDER: &str = "Pathfinder";
pub const PLAN_MOTHER_LODE: &str = "Mother Lode";

/// One price-id → plan-name mapping.
///
/// Promotional entries (`promo` set) resolve inbound price ids while a
/// cohort is still on discounted pricing, and identify which promo a new
/// subscription on that price enrolls. They are never handed out when a
/// plan name is resolved back to a price for an outbound mutation.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub price_id: String,
    pub plan: String,
    pub promo: Option<PromoType>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    entries: Vec<PlanEntry>,
}

impl PlanCatalog {
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        Self { entries }
    }

    /// Build the catalog from configured price ids. All promo cohorts buy
    /// in on discounted Prospector pricing.
    pub fn from_price_ids(prices: &PriceIds) -> Self {
        let mut entries = vec![
            PlanEntry {
                price_id: prices.prospector.clone(),
                plan: PLAN_PROSPECTOR.to_string(),
                promo: None,
            },
            PlanEntry {
                price_id: prices.pathfinder.clone(),
                plan: PLAN_PATHFINDER.to_string(),
                promo: None,
            },
            PlanEntry {
                price_id: prices.mother_lode.clone(),
                plan: PLAN_MOTHER_LODE.to_string(),
                promo: None,
            },
        ];

        let promo_prices = [
            (&prices.founding_member, PromoType::FoundingMember),
            (&prices.early_adopter, PromoType::EarlyAdopter),
            (&prices.beta_tester, PromoType::BetaTester),
            (&prices.one_week_trial, PromoType::OneWeekTrial),
        ];

        for (price_id, promo) in promo_prices {
            if let Some(price_id) = price_id {
                entries.push(PlanEntry {
                    price_id: price_id.clone(),
                    plan: PLAN_PROSPECTOR.to_string(),
                    promo: Some(promo),
                });
            }
        }

        Self { entries }
    }

    /// Resolve a price id to its plan name.
    pub fn plan_for_price(&self, price_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.price_id == price_id)
            .map(|e| e.plan.as_str())
    }

    /// The promo cohort a price id enrolls, if it is promotional pricing.
    pub fn promo_for_price(&self, price_id: &str) -> Option<PromoType> {
        self.entries
            .iter()
            .find(|e| e.price_id == price_id)
            .and_then(|e| e.promo)
    }

    /// Resolve a plan name to its standard (non-promotional) price id.
    pub fn price_for_plan(&self, plan: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.promo.is_none() && e.plan == plan)
            .map(|e| e.price_id.as_str())
    }

    pub fn is_known_plan(&self, plan: &str) -> bool {
        self.entries.iter().any(|e| e.plan == plan)
    }
}
