//! Buyer self-discount, a percentage of an item's net profit.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EngineError;
use crate::money::{self, round_currency};
use crate::settings::TierSettings;
use crate::tier::PurchaseTier;
use crate::types::User;

/// The discount a buyer earns on one order line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BuyerDiscount {
    pub discount_applicable: bool,
    pub discount_amount: Decimal,
    pub discount_percentage: Decimal,
    pub tier: PurchaseTier,
}

/// The discount percentage for a purchase total. Tier 2 moves linearly from
/// the tier 1 percentage at its lower bound to the tier 2 maximum at the tier 3
/// threshold.
pub fn discount_percentage(total_purchase_amount: Decimal, settings: &TierSettings) -> Decimal {
    match PurchaseTier::for_total(total_purchase_amount, settings) {
        PurchaseTier::Tier1 => settings.tier1_discount_percent,
        PurchaseTier::Tier2 => {
            let span = settings.tier3_min_purchase - settings.tier2_min_purchase;
            let progress = (total_purchase_amount - settings.tier2_min_purchase) / span;
            settings.tier1_discount_percent
                + progress * (settings.tier2_max_discount_percent - settings.tier1_discount_percent)
        }
        PurchaseTier::Tier3 => settings.tier3_discount_percent,
    }
}

/// Computes, but does not apply, the buyer's discount on one item.
/// Locked buyers and non-positive net profit get nothing.
pub fn calculate_buyer_discount(
    buyer: &User,
    net_profit: Decimal,
    settings: &TierSettings,
) -> Result<BuyerDiscount, EngineError> {
    let total = buyer.total_purchase_amount;
    let tier = PurchaseTier::for_total(total, settings);

    if !buyer.referral_unlocked || total < settings.unlock_threshold {
        return Ok(BuyerDiscount {
            discount_applicable: false,
            discount_amount: Decimal::ZERO,
            discount_percentage: Decimal::ZERO,
            tier,
        });
    }

    let discount_percentage = discount_percentage(total, settings);
    let discount_amount = if net_profit > Decimal::ZERO {
        round_currency(money::percent_of(net_profit, discount_percentage, "buyer discount")?)
    } else {
        Decimal::ZERO
    };

    Ok(BuyerDiscount {
        discount_applicable: net_profit > Decimal::ZERO,
        discount_amount,
        discount_percentage,
        tier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn buyer(total: i64, unlocked: bool) -> User {
        let mut user = User::new(1, None, Utc::now());
        user.total_purchase_amount = Decimal::from(total);
        user.referral_unlocked = unlocked;
        user
    }

    #[test]
    fn interpolates_inside_tier_two() {
        let s = TierSettings::default();
        assert_eq!(discount_percentage(Decimal::from(5000), &s), Decimal::from(15));
        assert_eq!(discount_percentage(Decimal::from(7500), &s), Decimal::new(225, 1));
        assert_eq!(discount_percentage(Decimal::from(10000), &s), Decimal::from(30));
        assert_eq!(discount_percentage(Decimal::from(250000), &s), Decimal::from(30));
    }

    #[test]
    fn locked_buyer_gets_nothing() {
        let d = calculate_buyer_discount(&buyer(12000, false), Decimal::from(1000), &TierSettings::default()).unwrap();
        assert!(!d.discount_applicable);
        assert_eq!(d.discount_amount, Decimal::ZERO);
        assert_eq!(d.tier, PurchaseTier::Tier3);
    }

    #[test]
    fn tier_three_buyer_gets_flat_rate() {
        let d = calculate_buyer_discount(&buyer(10000, true), Decimal::from(1000), &TierSettings::default()).unwrap();
        assert!(d.discount_applicable);
        assert_eq!(d.discount_percentage, Decimal::from(30));
        assert_eq!(d.discount_amount, Decimal::from(300));
    }

    #[test]
    fn amount_is_rounded_to_cents() {
        // 22.5% of 33.33 = 7.49925
        let d = calculate_buyer_discount(&buyer(7500, true), Decimal::new(3333, 2), &TierSettings::default()).unwrap();
        assert_eq!(d.discount_amount, Decimal::new(750, 2));
    }

    #[test]
    fn loss_making_item_has_no_discount() {
        let d = calculate_buyer_discount(&buyer(10000, true), Decimal::from(-50), &TierSettings::default()).unwrap();
        assert!(!d.discount_applicable);
        assert_eq!(d.discount_amount, Decimal::ZERO);
        assert_eq!(d.discount_percentage, Decimal::from(30));
    }

    #[test]
    fn tier_one_rate_is_defined_when_threshold_is_lowered() {
        let s = TierSettings {
            unlock_threshold: Decimal::from(1000),
            ..TierSettings::default()
        };
        let d = calculate_buyer_discount(&buyer(2000, true), Decimal::from(100), &s).unwrap();
        assert_eq!(d.tier, PurchaseTier::Tier1);
        assert_eq!(d.discount_percentage, Decimal::from(15));
        assert_eq!(d.discount_amount, Decimal::from(15));
    }
}
