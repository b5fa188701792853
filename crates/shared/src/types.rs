//! Core billing types shared across crates

use serde::{Deserialize, Serialize};

/// Promotional cohort a user can be enrolled in.
///
/// Stored as snake_case text in the `users.promo_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoType {
    FoundingMember,
    OneWeekTrial,
    BetaTester,
    EarlyAdopter,
}

impl PromoType {
    /// The database/text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoType::FoundingMember => "founding_member",
            PromoType::OneWeekTrial => "one_week_trial",
            PromoType::BetaTester => "beta_tester",
            PromoType::EarlyAdopter => "early_adopter",
        }
    }
}

impl std::fmt::Display for PromoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing profile fields pushed to the provider's customer object.
///
/// Independent of the login identity: `billing_email` is where invoices go,
/// never the account email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingProfile {
    pub billing_name: Option<String>,
    pub billing_email: Option<String>,
    pub billing_phone: Option<String>,
    pub billing_address: Option<String>,
}

impl BillingProfile {
    pub fn is_empty(&self) -> bool {
        self.billing_name.is_none()
            && self.billing_email.is_none()
            && self.billing_phone.is_none()
            && self.billing_address.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promo_type_serializes_as_snake_case() {
        for (promo, text) in [
            (PromoType::FoundingMember, "founding_member"),
            (PromoType::OneWeekTrial, "one_week_trial"),
            (PromoType::BetaTester, "beta_tester"),
            (PromoType::EarlyAdopter, "early_adopter"),
        ] {
            assert_eq!(promo.as_str(), text);
            assert_eq!(
                serde_json::to_value(promo).unwrap(),
                serde_json::Value::String(text.to_string())
            );
            assert_eq!(
                serde_json::from_value::<PromoType>(serde_json::Value::String(text.to_string()))
                    .unwrap(),
                promo
            );
        }
    }

    #[test]
    fn unknown_promo_type_fails_to_parse() {
        assert!(serde_json::from_str::<PromoType>("\"gold_rush\"").is_err());
    }

    #[test]
    fn empty_profile_is_detected() {
        assert!(BillingProfile::default().is_empty());
        assert!(!BillingProfile {
            billing_name: Some("Nugget Mining Co".to_string()),
            ..Default::default()
        }
        .is_empty());
    }
}
