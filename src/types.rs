use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tier::PurchaseTier;

/// Identifier of a marketplace user.
pub type UserId = i64;
/// Identifier of an order, owned by the order subsystem.
pub type OrderId = Uuid;
/// Identifier of a single order line.
pub type OrderItemId = i64;

/// A user as seen by the referral engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    /// The ID of the user.
    pub id: UserId,
    /// Lifetime purchase total, excluding shipping and tax. Never decreases.
    pub total_purchase_amount: Decimal,
    /// Whether the user has crossed the unlock threshold. Never reverts.
    pub referral_unlocked: bool,
    /// The shareable referral code, assigned once.
    pub referral_code: Option<String>,
    /// The direct referrer, fixed at registration.
    pub referred_by: Option<UserId>,
    /// The timestamp when the user was registered.
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: UserId, referred_by: Option<UserId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            total_purchase_amount: Decimal::ZERO,
            referral_unlocked: false,
            referral_code: None,
            referred_by,
            created_at,
        }
    }
}

/// An order line as delivered by the order subsystem.
///
/// Every field is optional on the wire so that a malformed line is reported
/// by the engine with its position instead of failing deserialization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrderItemInput {
    pub order_item_id: Option<OrderItemId>,
    pub unit_price: Option<Decimal>,
    pub quantity: Option<i64>,
    /// Unknown cost is treated as zero.
    pub unit_cost: Option<Decimal>,
}

/// A validated order line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderItem {
    pub order_item_id: OrderItemId,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub unit_cost: Decimal,
    /// `unit_price * quantity`.
    pub selling_amount: Decimal,
    /// `unit_cost * quantity`.
    pub cost_amount: Decimal,
}

impl OrderItem {
    /// Returns `None` when price or cost times quantity does not fit a `Decimal`.
    pub fn try_new(
        order_item_id: OrderItemId,
        unit_price: Decimal,
        quantity: u32,
        unit_cost: Decimal,
    ) -> Option<Self> {
        let qty = Decimal::from(quantity);
        Some(Self {
            order_item_id,
            unit_price,
            quantity,
            unit_cost,
            selling_amount: unit_price.checked_mul(qty)?,
            cost_amount: unit_cost.checked_mul(qty)?,
        })
    }
}

/// Which commission model produced a commission row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    /// Flat percentages; the buyer's unlocking or pre-unlock purchases.
    FirstPurchase,
    /// Tier-dependent percentages for an already unlocked buyer.
    SubsequentPurchase,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::FirstPurchase => "first_purchase",
            CommissionType::SubsequentPurchase => "subsequent_purchase",
        }
    }
}

impl fmt::Display for CommissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommissionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "first_purchase" => Ok(CommissionType::FirstPurchase),
            "subsequent_purchase" => Ok(CommissionType::SubsequentPurchase),
            _ => anyhow::bail!("invalid commission type: {}", s),
        }
    }
}

/// An audit row: one commission paid to one ancestor for one order line.
/// Never updated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferralCommission {
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub buyer_id: UserId,
    pub referrer_id: UserId,
    /// 1 for the direct referrer, up to 8.
    pub level: i16,
    pub selling_amount: Decimal,
    pub cost_amount: Decimal,
    pub gross_profit: Decimal,
    pub gateway_fee: Decimal,
    pub net_profit: Decimal,
    pub commission_percentage: Decimal,
    pub commission_amount: Decimal,
    pub commission_type: CommissionType,
    /// Discount granted to the buyer on this line.
    pub buyer_discount_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// The buyer's purchase state as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseStanding {
    pub user_id: UserId,
    pub total_purchase_amount: Decimal,
    pub tier: PurchaseTier,
    pub referral_unlocked: bool,
    pub referral_code: Option<String>,
    /// The discount percentage the buyer currently receives, zero while locked.
    pub discount_percentage: Decimal,
}

/// Aggregate outcome of applying one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReport {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    /// Set when the order had already been applied; nothing was written.
    pub already_processed: bool,
    pub total_selling_amount: Decimal,
    pub total_net_profit: Decimal,
    pub total_commission_amount: Decimal,
    pub total_system_amount: Decimal,
    pub discount_amount: Decimal,
    pub just_unlocked: bool,
    pub tier_before: PurchaseTier,
    pub tier_after: PurchaseTier,
    pub commissions_recorded: usize,
}
