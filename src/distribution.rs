//! Splits an item's net profit across the buyer's ancestors.
//!
//! Each of levels 2 to 8 receives the full level-2-to-8 percentage on its own;
//! the percentages are not a pool. With a long chain the payouts can exceed
//! the net profit, which leaves a negative `system_amount`. That arithmetic is
//! kept as is.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::chain::ReferralChain;
use crate::error::EngineError;
use crate::money::{self, round_currency};
use crate::settings::{CommissionSettings, LevelPercentages};
use crate::tier::PurchaseTier;
use crate::types::{CommissionType, UserId};

/// What one ancestor earns from one order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelCommission {
    /// The ancestor being paid.
    pub user_id: UserId,
    /// 1 for the direct referrer, up to 8.
    pub level: u8,
    pub percentage: Decimal,
    /// Rounded to cents.
    pub amount: Decimal,
}

/// The split of one line's net profit between the chain and the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionDistribution {
    pub commission_type: CommissionType,
    pub commissions: Vec<LevelCommission>,
    pub total_commission_amount: Decimal,
    /// What the platform keeps. Not clamped.
    pub system_amount: Decimal,
}

impl CommissionDistribution {
    fn nothing(commission_type: CommissionType, net_profit: Decimal) -> Self {
        Self {
            commission_type,
            commissions: Vec::new(),
            total_commission_amount: Decimal::ZERO,
            system_amount: net_profit,
        }
    }
}

/// Picks the commission model for a purchase. The flat model (Scenario A)
/// covers the unlocking purchase and everything before it; afterwards the
/// configured subsequent-purchase model (Scenario B) applies.
pub fn commission_type_for(
    buyer_total_purchased: Decimal,
    is_first_qualifying_purchase: bool,
    settings: &CommissionSettings,
) -> CommissionType {
    if is_first_qualifying_purchase || buyer_total_purchased < settings.tiers.unlock_threshold {
        CommissionType::FirstPurchase
    } else {
        CommissionType::SubsequentPurchase
    }
}

/// `chain` is `None` when the buyer has no stored chain, which pays nobody.
pub fn calculate_commission_distribution(
    chain: Option<&ReferralChain>,
    net_profit: Decimal,
    buyer_total_purchased: Decimal,
    is_first_qualifying_purchase: bool,
    settings: &CommissionSettings,
) -> Result<CommissionDistribution, EngineError> {
    let commission_type =
        commission_type_for(buyer_total_purchased, is_first_qualifying_purchase, settings);

    let Some(chain) = chain.filter(|c| !c.is_empty()) else {
        return Ok(CommissionDistribution::nothing(commission_type, net_profit));
    };
    if net_profit <= Decimal::ZERO {
        return Ok(CommissionDistribution::nothing(commission_type, net_profit));
    }

    let percentages: LevelPercentages = match commission_type {
        CommissionType::FirstPurchase => settings.flat,
        CommissionType::SubsequentPurchase => {
            let tier = PurchaseTier::for_total(buyer_total_purchased, &settings.tiers);
            settings.subsequent_percentages(tier)?
        }
    };

    let commissions = chain
        .ancestors()
        .map(|(level, user_id)| {
            let percentage = percentages.for_level(level);
            Ok(LevelCommission {
                user_id,
                level: level as u8,
                percentage,
                amount: round_currency(money::percent_of(net_profit, percentage, "commission")?),
            })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    let total_commission_amount =
        money::sum(commissions.iter().map(|c| &c.amount), "commission total")?;

    Ok(CommissionDistribution {
        commission_type,
        commissions,
        total_commission_amount,
        system_amount: money::sub(net_profit, total_commission_amount, "system amount")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CommissionModel;

    fn full_chain() -> ReferralChain {
        ReferralChain::from_levels(0, &(1..=8).map(Some).collect::<Vec<_>>())
    }

    fn tiered_settings() -> CommissionSettings {
        let mut s = CommissionSettings::default();
        s.tiered = [
            LevelPercentages::new(Decimal::from(30), Decimal::from(5)),
            LevelPercentages::new(Decimal::from(25), Decimal::from(4)),
            LevelPercentages::new(Decimal::from(20), Decimal::from(3)),
        ];
        s
    }

    #[test]
    fn flat_model_over_full_chain() {
        let d = calculate_commission_distribution(
            Some(&full_chain()),
            Decimal::from(1000),
            Decimal::from(10000),
            true,
            &CommissionSettings::default(),
        )
        .unwrap();

        assert_eq!(d.commission_type, CommissionType::FirstPurchase);
        assert_eq!(d.commissions.len(), 8);
        assert_eq!(d.commissions[0].user_id, 1);
        assert_eq!(d.commissions[0].amount, Decimal::from(300));
        assert!(d.commissions[1..].iter().all(|c| c.amount == Decimal::from(50)));
        assert_eq!(d.total_commission_amount, Decimal::from(650));
        assert_eq!(d.system_amount, Decimal::from(350));
    }

    #[test]
    fn pre_unlock_purchase_uses_flat_model() {
        let d = calculate_commission_distribution(
            Some(&full_chain()),
            Decimal::from(100),
            Decimal::from(1200),
            false,
            &tiered_settings(),
        )
        .unwrap();
        assert_eq!(d.commission_type, CommissionType::FirstPurchase);
        assert_eq!(d.commissions[0].percentage, Decimal::from(30));
    }

    #[test]
    fn tiered_model_keys_on_buyer_tier() {
        let settings = tiered_settings();
        let chain = ReferralChain::from_levels(0, &[Some(11), Some(12)]);

        let tier2 = calculate_commission_distribution(
            Some(&chain),
            Decimal::from(1000),
            Decimal::from(6000),
            false,
            &settings,
        )
        .unwrap();
        assert_eq!(tier2.commission_type, CommissionType::SubsequentPurchase);
        assert_eq!(tier2.commissions[0].amount, Decimal::from(250));
        assert_eq!(tier2.commissions[1].amount, Decimal::from(40));

        let tier3 = calculate_commission_distribution(
            Some(&chain),
            Decimal::from(1000),
            Decimal::from(20000),
            false,
            &settings,
        )
        .unwrap();
        assert_eq!(tier3.commissions[0].amount, Decimal::from(200));
        assert_eq!(tier3.commissions[1].amount, Decimal::from(30));
        assert_eq!(tier3.system_amount, Decimal::from(770));
    }

    #[test]
    fn option1_needs_its_own_table() {
        let mut settings = CommissionSettings::default();
        settings.commission_model = CommissionModel::Option1;
        let chain = ReferralChain::from_levels(0, &[Some(11)]);

        let err = calculate_commission_distribution(
            Some(&chain),
            Decimal::from(1000),
            Decimal::from(20000),
            false,
            &settings,
        );
        assert!(matches!(err, Err(EngineError::Settings(_))));

        settings.option1_subsequent = Some(LevelPercentages::new(Decimal::from(10), Decimal::from(1)));
        let d = calculate_commission_distribution(
            Some(&chain),
            Decimal::from(1000),
            Decimal::from(20000),
            false,
            &settings,
        )
        .unwrap();
        assert_eq!(d.commissions[0].amount, Decimal::from(100));
    }

    #[test]
    fn payouts_may_exceed_net_profit() {
        let mut settings = CommissionSettings::default();
        settings.flat = LevelPercentages::new(Decimal::from(40), Decimal::from(10));
        let d = calculate_commission_distribution(
            Some(&full_chain()),
            Decimal::from(100),
            Decimal::ZERO,
            true,
            &settings,
        )
        .unwrap();
        assert_eq!(d.total_commission_amount, Decimal::from(110));
        assert_eq!(d.system_amount, Decimal::from(-10));
    }

    #[test]
    fn missing_or_empty_chain_pays_nobody() {
        let settings = CommissionSettings::default();
        for chain in [None, Some(ReferralChain::root(3))] {
            let d = calculate_commission_distribution(
                chain.as_ref(),
                Decimal::from(500),
                Decimal::ZERO,
                true,
                &settings,
            )
            .unwrap();
            assert!(d.commissions.is_empty());
            assert_eq!(d.system_amount, Decimal::from(500));
        }
    }

    #[test]
    fn non_positive_profit_pays_nobody() {
        let d = calculate_commission_distribution(
            Some(&full_chain()),
            Decimal::from(-20),
            Decimal::ZERO,
            true,
            &CommissionSettings::default(),
        )
        .unwrap();
        assert!(d.commissions.is_empty());
        assert_eq!(d.system_amount, Decimal::from(-20));
    }

    #[test]
    fn only_populated_levels_are_paid() {
        let chain = ReferralChain::from_levels(0, &[Some(21), None, Some(23)]);
        let d = calculate_commission_distribution(
            Some(&chain),
            Decimal::from(200),
            Decimal::ZERO,
            true,
            &CommissionSettings::default(),
        )
        .unwrap();
        let levels: Vec<u8> = d.commissions.iter().map(|c| c.level).collect();
        assert_eq!(levels, vec![1, 3]);
        assert_eq!(d.total_commission_amount, Decimal::from(70));
    }
}
