//! Order-level orchestration: one completed order in, purchase tier, buyer
//! discount and ancestor commissions out, all inside one unit of work.

use std::collections::HashSet;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use crate::chain::ReferralChain;
use crate::discount::{calculate_buyer_discount, discount_percentage};
use crate::distribution::calculate_commission_distribution;
use crate::error::EngineError;
use crate::money;
use crate::profit::calculate_order_profit;
use crate::settings::CommissionSettings;
use crate::store::ReferralStore;
use crate::tier::{PurchaseTier, record_purchase};
use crate::types::{
    ApplyReport, OrderId, OrderItem, OrderItemInput, PurchaseStanding, ReferralCommission, User,
    UserId,
};
use crate::wallet::commission_description;

/// Who referred a registering user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Referrer {
    Code(String),
    User(UserId),
}

/// Validates raw order lines. Fails on the first malformed line, before
/// anything is written. Line ids must be unique within the order.
pub fn validate_items(items: &[OrderItemInput]) -> Result<Vec<OrderItem>, EngineError> {
    if items.is_empty() {
        return Err(EngineError::EmptyOrder);
    }

    let mut seen = HashSet::with_capacity(items.len());

    items
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let invalid = |reason: &str| EngineError::InvalidOrderItem {
                index,
                reason: reason.to_string(),
            };
            let order_item_id = raw.order_item_id.ok_or_else(|| invalid("missing order_item_id"))?;
            if !seen.insert(order_item_id) {
                return Err(invalid("duplicate order_item_id"));
            }
            let unit_price = raw.unit_price.ok_or_else(|| invalid("missing unit_price"))?;
            let quantity = raw.quantity.ok_or_else(|| invalid("missing quantity"))?;
            let unit_cost = raw.unit_cost.unwrap_or(Decimal::ZERO);

            if unit_price < Decimal::ZERO {
                return Err(invalid("unit_price must be >= 0"));
            }
            if unit_cost < Decimal::ZERO {
                return Err(invalid("unit_cost must be >= 0"));
            }
            let quantity = u32::try_from(quantity)
                .ok()
                .filter(|q| *q >= 1)
                .ok_or_else(|| invalid("quantity must be a positive integer"))?;

            OrderItem::try_new(order_item_id, unit_price, quantity, unit_cost)
                .ok_or_else(|| invalid("line amount out of range"))
        })
        .collect()
}

impl ApplyReport {
    fn already_processed(order_id: OrderId, buyer_id: UserId, tier: PurchaseTier) -> Self {
        Self {
            order_id,
            buyer_id,
            already_processed: true,
            total_selling_amount: Decimal::ZERO,
            total_net_profit: Decimal::ZERO,
            total_commission_amount: Decimal::ZERO,
            total_system_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            just_unlocked: false,
            tier_before: tier,
            tier_after: tier,
            commissions_recorded: 0,
        }
    }
}

/// Applies a payment-confirmed order: records the purchase against the
/// buyer's tier, discounts the order for an unlocked buyer, and pays every
/// ancestor in the buyer's chain. Either all of it is committed or none.
///
/// Re-applying an order that was already applied writes nothing and reports
/// `already_processed`.
#[instrument(skip(store, items), fields(items = items.len()))]
pub async fn apply_order_commissions(
    store: &dyn ReferralStore,
    order_id: OrderId,
    buyer_id: UserId,
    items: &[OrderItemInput],
) -> Result<ApplyReport, EngineError> {
    let items = validate_items(items)?;

    let mut uow = store.begin().await?;
    let settings = CommissionSettings::from_snapshot(&uow.settings().await?)?;
    let threshold = settings.tiers.unlock_threshold;
    let profit = calculate_order_profit(&items, settings.gateway_fee_percent)?;

    let mut buyer = uow
        .lock_user(buyer_id)
        .await?
        .ok_or(EngineError::BuyerNotFound(buyer_id))?;

    if !uow.claim_order(order_id, buyer_id).await? {
        warn!(%order_id, buyer_id, "order referrals already applied, skipping");
        let tier = PurchaseTier::for_total(buyer.total_purchase_amount, &settings.tiers);
        return Ok(ApplyReport::already_processed(order_id, buyer_id, tier));
    }

    let now = Utc::now();

    let purchase = record_purchase(
        &mut buyer,
        profit.totals.total_selling_amount,
        &settings.tiers,
        now,
    )?;
    uow.update_purchase_state(&buyer).await?;

    let discount_eligible = !purchase.just_unlocked && purchase.new_total >= threshold;
    let first_qualifying = purchase.just_unlocked || purchase.new_total < threshold;

    let item_discounts = profit
        .items
        .iter()
        .map(|p| {
            if discount_eligible {
                calculate_buyer_discount(&buyer, p.net_profit, &settings.tiers)
                    .map(|d| d.discount_amount)
            } else {
                Ok(Decimal::ZERO)
            }
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    let discount_amount = money::sum(&item_discounts, "order discount")?;
    if discount_amount > Decimal::ZERO && !uow.apply_order_discount(order_id, discount_amount).await? {
        return Err(EngineError::OrderNotFound(order_id));
    }

    let chain = uow.referral_chain(buyer_id).await?;

    let mut total_commission_amount = Decimal::ZERO;
    let mut total_system_amount = Decimal::ZERO;
    let mut commissions_recorded = 0;

    for (item, item_discount) in profit.items.iter().zip(&item_discounts) {
        let distribution = calculate_commission_distribution(
            chain.as_ref(),
            item.net_profit,
            purchase.new_total,
            first_qualifying,
            &settings,
        )?;
        total_commission_amount = money::add(
            total_commission_amount,
            distribution.total_commission_amount,
            "order commission total",
        )?;
        total_system_amount =
            money::add(total_system_amount, distribution.system_amount, "order system amount")?;

        for commission in &distribution.commissions {
            if commission.amount <= Decimal::ZERO {
                continue;
            }
            let record = ReferralCommission {
                order_id,
                order_item_id: item.order_item_id,
                buyer_id,
                referrer_id: commission.user_id,
                level: i16::from(commission.level),
                selling_amount: item.selling_amount,
                cost_amount: item.cost_amount,
                gross_profit: item.gross_profit,
                gateway_fee: item.gateway_fee,
                net_profit: item.net_profit,
                commission_percentage: commission.percentage,
                commission_amount: commission.amount,
                commission_type: distribution.commission_type,
                buyer_discount_amount: *item_discount,
                created_at: now,
            };
            uow.insert_commission(&record).await?;
            uow.credit_wallet(
                commission.user_id,
                commission.amount,
                &commission_description(order_id, item.order_item_id, commission.level),
                now,
            )
            .await?;
            commissions_recorded += 1;
        }
    }

    uow.commit().await?;

    let report = ApplyReport {
        order_id,
        buyer_id,
        already_processed: false,
        total_selling_amount: profit.totals.total_selling_amount,
        total_net_profit: profit.totals.total_net_profit,
        total_commission_amount,
        total_system_amount,
        discount_amount,
        just_unlocked: purchase.just_unlocked,
        tier_before: purchase.tier_before,
        tier_after: purchase.tier_after,
        commissions_recorded,
    };

    info!(
        %order_id,
        buyer_id,
        selling = %report.total_selling_amount,
        net_profit = %report.total_net_profit,
        commissions = %report.total_commission_amount,
        discount = %report.discount_amount,
        just_unlocked = report.just_unlocked,
        tier = purchase.tier_after.number(),
        "order referrals applied"
    );

    Ok(report)
}

/// Entry point for the order subsystem once an order's payment is confirmed.
/// Referral processing never fails the order: errors are logged and the
/// order can be replayed later.
pub async fn process_order_referrals(
    store: &dyn ReferralStore,
    order_id: OrderId,
    buyer_id: UserId,
    items: &[OrderItemInput],
) -> Option<ApplyReport> {
    match apply_order_commissions(store, order_id, buyer_id, items).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!(%order_id, buyer_id, error = %e, "referral processing failed");
            None
        }
    }
}

/// Registers a user and builds their referral chain from the referrer's.
#[instrument(skip(store))]
pub async fn register_user(
    store: &dyn ReferralStore,
    user_id: UserId,
    referrer: Option<Referrer>,
) -> Result<ReferralChain, EngineError> {
    let mut uow = store.begin().await?;

    if uow.lock_user(user_id).await?.is_some() {
        return Err(EngineError::UserAlreadyRegistered(user_id));
    }

    let referrer = match referrer {
        None => None,
        Some(Referrer::Code(code)) => {
            let found = uow.find_user_by_referral_code(&code).await?;
            Some(found.ok_or(EngineError::UnknownReferralCode(code))?)
        }
        Some(Referrer::User(id)) => Some(
            uow.lock_user(id)
                .await?
                .ok_or(EngineError::UserNotFound(id))?,
        ),
    };

    let chain = match &referrer {
        None => ReferralChain::root(user_id),
        Some(referrer) => {
            let referrer_chain = uow
                .referral_chain(referrer.id)
                .await?
                .unwrap_or_else(|| ReferralChain::root(referrer.id));
            ReferralChain::descend_from(user_id, &referrer_chain)
        }
    };

    let user = User::new(user_id, referrer.map(|r| r.id), Utc::now());
    // a concurrent registration of the same id can win between the check
    // above and this insert
    if !uow.insert_user(&user).await? {
        return Err(EngineError::UserAlreadyRegistered(user_id));
    }
    uow.insert_referral_chain(&chain).await?;
    uow.commit().await?;

    info!(user_id, referred_by = ?user.referred_by, depth = chain.ancestors().count(), "user registered");
    Ok(chain)
}

/// A user's lifetime total, tier and current discount rate.
pub async fn purchase_standing(
    store: &dyn ReferralStore,
    user_id: UserId,
) -> Result<PurchaseStanding, EngineError> {
    let settings = CommissionSettings::from_snapshot(&store.settings().await?)?;
    let user = store
        .user(user_id)
        .await?
        .ok_or(EngineError::UserNotFound(user_id))?;

    let unlocked =
        user.referral_unlocked && user.total_purchase_amount >= settings.tiers.unlock_threshold;
    Ok(PurchaseStanding {
        user_id,
        total_purchase_amount: user.total_purchase_amount,
        tier: PurchaseTier::for_total(user.total_purchase_amount, &settings.tiers),
        referral_unlocked: user.referral_unlocked,
        discount_percentage: if unlocked {
            discount_percentage(user.total_purchase_amount, &settings.tiers)
        } else {
            Decimal::ZERO
        },
        referral_code: user.referral_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: i64, price: i64, qty: i64, cost: Option<i64>) -> OrderItemInput {
        OrderItemInput {
            order_item_id: Some(id),
            unit_price: Some(Decimal::from(price)),
            quantity: Some(qty),
            unit_cost: cost.map(Decimal::from),
        }
    }

    #[test]
    fn unknown_cost_counts_as_zero() {
        let items = validate_items(&[raw(1, 100, 2, None)]).unwrap();
        assert_eq!(items[0].unit_cost, Decimal::ZERO);
        assert_eq!(items[0].quantity, 2);
    }

    #[test]
    fn rejects_missing_fields_with_position() {
        let mut missing_price = raw(2, 100, 1, None);
        missing_price.unit_price = None;
        let err = validate_items(&[raw(1, 100, 1, None), missing_price]).unwrap_err();
        match err {
            EngineError::InvalidOrderItem { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("unit_price"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_quantities_and_prices() {
        assert!(validate_items(&[raw(1, 100, 0, None)]).is_err());
        assert!(validate_items(&[raw(1, 100, -3, None)]).is_err());
        assert!(validate_items(&[raw(1, -1, 1, None)]).is_err());
        assert!(validate_items(&[raw(1, 1, 1, Some(-5))]).is_err());
        assert!(matches!(validate_items(&[]), Err(EngineError::EmptyOrder)));
    }

    #[test]
    fn rejects_repeated_line_ids() {
        let err = validate_items(&[raw(7, 100, 1, None), raw(8, 5, 1, None), raw(7, 100, 1, None)])
            .unwrap_err();
        match err {
            EngineError::InvalidOrderItem { index, reason } => {
                assert_eq!(index, 2);
                assert!(reason.contains("duplicate"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_line_amounts_beyond_decimal_range() {
        let mut huge = raw(1, 0, 2, None);
        huge.unit_price = Some(Decimal::MAX);
        assert!(matches!(
            validate_items(&[huge]),
            Err(EngineError::InvalidOrderItem { index: 0, .. })
        ));
    }
}
