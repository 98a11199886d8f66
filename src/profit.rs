//! Per-item and per-order profit. All figures are unrounded.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EngineError;
use crate::money;
use crate::types::{OrderItem, OrderItemId};

/// Profit figures for one order line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfitBreakdown {
    pub order_item_id: OrderItemId,
    /// Price times quantity.
    pub selling_amount: Decimal,
    /// Cost times quantity.
    pub cost_amount: Decimal,
    pub gross_profit: Decimal,
    /// The payment gateway's cut of the selling amount.
    pub gateway_fee: Decimal,
    /// May be negative.
    pub net_profit: Decimal,
}

/// Order-level sums of every [`ProfitBreakdown`] field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProfitTotals {
    pub total_selling_amount: Decimal,
    pub total_cost_amount: Decimal,
    pub total_gross_profit: Decimal,
    pub total_gateway_fee: Decimal,
    pub total_net_profit: Decimal,
    /// `total_net_profit / total_selling_amount`, zero for a free order.
    pub overall_profit_margin: Decimal,
}

/// Per-line breakdowns in input order, plus their totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderProfit {
    pub items: Vec<ProfitBreakdown>,
    pub totals: ProfitTotals,
}

/// `gateway_fee_percent` is a percentage, 3 meaning 3%.
pub fn calculate_item_profit(
    item: &OrderItem,
    gateway_fee_percent: Decimal,
) -> Result<ProfitBreakdown, EngineError> {
    let gross_profit = money::sub(item.selling_amount, item.cost_amount, "gross profit")?;
    let gateway_fee = money::percent_of(item.selling_amount, gateway_fee_percent, "gateway fee")?;
    Ok(ProfitBreakdown {
        order_item_id: item.order_item_id,
        selling_amount: item.selling_amount,
        cost_amount: item.cost_amount,
        gross_profit,
        gateway_fee,
        net_profit: money::sub(gross_profit, gateway_fee, "net profit")?,
    })
}

/// Breaks down every line and sums the order. Fails if any figure leaves
/// the representable range.
pub fn calculate_order_profit(
    items: &[OrderItem],
    gateway_fee_percent: Decimal,
) -> Result<OrderProfit, EngineError> {
    let items = items
        .iter()
        .map(|item| calculate_item_profit(item, gateway_fee_percent))
        .collect::<Result<Vec<_>, _>>()?;

    let mut totals = ProfitTotals::default();
    for p in &items {
        totals.total_selling_amount = money::add(totals.total_selling_amount, p.selling_amount, "order total")?;
        totals.total_cost_amount = money::add(totals.total_cost_amount, p.cost_amount, "order cost")?;
        totals.total_gross_profit = money::add(totals.total_gross_profit, p.gross_profit, "order gross profit")?;
        totals.total_gateway_fee = money::add(totals.total_gateway_fee, p.gateway_fee, "order gateway fee")?;
        totals.total_net_profit = money::add(totals.total_net_profit, p.net_profit, "order net profit")?;
    }
    if !totals.total_selling_amount.is_zero() {
        totals.overall_profit_margin = totals
            .total_net_profit
            .checked_div(totals.total_selling_amount)
            .ok_or(EngineError::AmountOverflow("profit margin"))?;
    }

    Ok(OrderProfit { items, totals })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: OrderItemId, price: i64, qty: u32, cost: i64) -> OrderItem {
        OrderItem::try_new(id, Decimal::from(price), qty, Decimal::from(cost)).unwrap()
    }

    #[test]
    fn item_profit_subtracts_cost_and_fee() {
        let p = calculate_item_profit(&item(1, 10000, 1, 6000), Decimal::from(3)).unwrap();
        assert_eq!(p.selling_amount, Decimal::from(10000));
        assert_eq!(p.gross_profit, Decimal::from(4000));
        assert_eq!(p.gateway_fee, Decimal::from(300));
        assert_eq!(p.net_profit, Decimal::from(3700));
    }

    #[test]
    fn quantity_scales_price_and_cost() {
        let p = calculate_item_profit(
            &OrderItem::try_new(1, Decimal::new(1999, 2), 3, Decimal::new(500, 2)).unwrap(),
            Decimal::new(25, 1),
        )
        .unwrap();
        assert_eq!(p.selling_amount, Decimal::new(5997, 2));
        assert_eq!(p.cost_amount, Decimal::from(15));
        // 59.97 * 2.5% = 1.49925
        assert_eq!(p.gateway_fee, Decimal::new(149925, 5));
        assert_eq!(p.net_profit, p.selling_amount - p.cost_amount - p.gateway_fee);
    }

    #[test]
    fn loss_making_item_keeps_negative_net_profit() {
        let p = calculate_item_profit(&item(1, 100, 1, 120), Decimal::from(3)).unwrap();
        assert_eq!(p.net_profit, Decimal::from(-23));
    }

    #[test]
    fn order_totals_and_margin() {
        let profit =
            calculate_order_profit(&[item(1, 1000, 2, 500), item(2, 500, 1, 0)], Decimal::from(3)).unwrap();
        let t = profit.totals;
        assert_eq!(profit.items.len(), 2);
        assert_eq!(t.total_selling_amount, Decimal::from(2500));
        assert_eq!(t.total_cost_amount, Decimal::from(1000));
        assert_eq!(t.total_gateway_fee, Decimal::from(75));
        assert_eq!(t.total_net_profit, Decimal::from(1425));
        assert_eq!(t.overall_profit_margin, Decimal::new(57, 2));
    }

    #[test]
    fn free_order_has_zero_margin() {
        let profit = calculate_order_profit(&[item(1, 0, 1, 0)], Decimal::from(3)).unwrap();
        assert_eq!(profit.totals.overall_profit_margin, Decimal::ZERO);
    }

    #[test]
    fn same_inputs_same_outputs() {
        let items = [item(1, 10000, 1, 6000), item(2, 250, 4, 100)];
        assert_eq!(
            calculate_order_profit(&items, Decimal::from(3)).unwrap(),
            calculate_order_profit(&items, Decimal::from(3)).unwrap()
        );
    }

    #[test]
    fn line_quantity_overflow_is_caught_at_construction() {
        assert!(OrderItem::try_new(1, Decimal::MAX, 2, Decimal::ZERO).is_none());
        assert!(OrderItem::try_new(1, Decimal::ONE, 2, Decimal::MAX).is_none());
    }

    #[test]
    fn order_total_overflow_is_an_error() {
        let huge = OrderItem::try_new(1, Decimal::MAX, 1, Decimal::ZERO).unwrap();
        assert!(calculate_item_profit(&huge, Decimal::from(3)).is_ok());
        let err = calculate_order_profit(&[huge, huge], Decimal::from(3)).unwrap_err();
        assert!(matches!(err, EngineError::AmountOverflow(_)));
    }
}
