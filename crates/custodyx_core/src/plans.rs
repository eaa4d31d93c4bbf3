//! crates/custodyx_core/src/plans.rs
//!
//! The catalogue of subscription plans offered on the pricing page.

use serde::Serialize;

use crate::domain::SubscriptionTier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPlan {
    pub tier: SubscriptionTier,
    pub name: String,
    /// Monthly price in whole US dollars.
    pub price: u32,
    /// Payments-provider price id. Empty for the free plan or when unconfigured.
    pub price_id: String,
    pub monthly_tokens: i64,
    pub features: Vec<String>,
    pub popular: bool,
}

fn features(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Builds the plan list with the configured price ids for the paid tiers.
pub fn pricing_plans(plus_price_id: Option<&str>, pro_price_id: Option<&str>) -> Vec<PricingPlan> {
    vec![
        PricingPlan {
            tier: SubscriptionTier::Free,
            name: "Free".to_string(),
            price: 0,
            price_id: String::new(),
            monthly_tokens: SubscriptionTier::Free.monthly_token_limit(),
            features: features(&[
                "Basic incident logging",
                "Up to 50K AI tokens/month",
                "Timeline view",
                "Local data storage",
            ]),
            popular: false,
        },
        PricingPlan {
            tier: SubscriptionTier::Plus,
            name: "Plus".to_string(),
            price: 29,
            price_id: plus_price_id.unwrap_or_default().to_string(),
            monthly_tokens: SubscriptionTier::Plus.monthly_token_limit(),
            features: features(&[
                "Everything in Free",
                "Pattern analysis",
                "Document library",
                "Legal assistant",
                "Up to 500K AI tokens/month",
                "Cloud data sync",
            ]),
            popular: true,
        },
        PricingPlan {
            tier: SubscriptionTier::Pro,
            name: "Pro".to_string(),
            price: 79,
            price_id: pro_price_id.unwrap_or_default().to_string(),
            monthly_tokens: SubscriptionTier::Pro.monthly_token_limit(),
            features: features(&[
                "Everything in Plus",
                "Deep behavioral insights",
                "Voice AI agent",
                "Evidence package builder",
                "Up to 5M AI tokens/month",
                "Priority support",
            ]),
            popular: false,
        },
    ]
}

/// The price id to check out for `tier`, if that tier can be bought.
pub fn price_id_for(plans: &[PricingPlan], tier: SubscriptionTier) -> Option<&str> {
    plans
        .iter()
        .find(|plan| plan.tier == tier)
        .map(|plan| plan.price_id.as_str())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configured_paid_tiers_have_price_ids() {
        let plans = pricing_plans(Some("price_plus"), None);

        assert_eq!(price_id_for(&plans, SubscriptionTier::Plus), Some("price_plus"));
        assert_eq!(price_id_for(&plans, SubscriptionTier::Pro), None);
        assert_eq!(price_id_for(&plans, SubscriptionTier::Free), None);
    }

    #[test]
    fn plan_limits_match_tier_limits() {
        for plan in pricing_plans(None, None) {
            assert_eq!(plan.monthly_tokens, plan.tier.monthly_token_limit());
        }
        let popular: Vec<_> = pricing_plans(None, None)
            .into_iter()
            .filter(|p| p.popular)
            .map(|p| p.tier)
            .collect();
        assert_eq!(popular, vec![SubscriptionTier::Plus]);
    }
}
