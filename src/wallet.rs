//! Internal commission wallets: an append-only transaction list plus a
//! running balance kept in step with it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EngineError;
use crate::money;
use crate::types::{OrderId, OrderItemId, UserId};

/// One ledger entry. Never updated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletTransaction {
    pub user_id: UserId,
    /// Positive for a credit.
    pub amount: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A user's commission wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wallet {
    pub user_id: UserId,
    /// Cached running balance, equal to the sum of `transactions`.
    pub balance: Decimal,
    /// Oldest first.
    pub transactions: Vec<WalletTransaction>,
}

impl Wallet {
    /// The wallet of a user who has never been credited.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            transactions: Vec::new(),
        }
    }

    /// Appends a transaction and moves the balance with it. On overflow the
    /// wallet is left unchanged.
    pub fn credit(
        &mut self,
        amount: Decimal,
        description: String,
        at: DateTime<Utc>,
    ) -> Result<WalletTransaction, EngineError> {
        let balance = money::add(self.balance, amount, "wallet balance")?;
        let tx = WalletTransaction {
            user_id: self.user_id,
            amount,
            description,
            created_at: at,
        };
        self.balance = balance;
        self.transactions.push(tx.clone());
        Ok(tx)
    }

    /// Sum of the ledger, `None` if it leaves the representable range.
    pub fn ledger_total(&self) -> Option<Decimal> {
        money::sum(self.transactions.iter().map(|t| &t.amount), "ledger total").ok()
    }

    /// Whether the cached balance equals the sum of the ledger.
    pub fn reconciles(&self) -> bool {
        self.ledger_total() == Some(self.balance)
    }
}

/// Ledger text for a commission credit.
pub fn commission_description(order_id: OrderId, order_item_id: OrderItemId, level: u8) -> String {
    format!("Level {level} referral commission for order {order_id} (item {order_item_id})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn credits_keep_balance_equal_to_ledger() {
        let mut wallet = Wallet::empty(4);
        wallet.credit(Decimal::new(1050, 2), "a".into(), Utc::now()).unwrap();
        wallet.credit(Decimal::from(3), "b".into(), Utc::now()).unwrap();
        assert_eq!(wallet.balance, Decimal::new(1350, 2));
        assert_eq!(wallet.transactions.len(), 2);
        assert!(wallet.reconciles());
    }

    #[test]
    fn tampered_balance_does_not_reconcile() {
        let mut wallet = Wallet::empty(4);
        wallet.credit(Decimal::from(5), "a".into(), Utc::now()).unwrap();
        wallet.balance = Decimal::from(6);
        assert!(!wallet.reconciles());
    }

    #[test]
    fn overflowing_credit_is_refused() {
        let mut wallet = Wallet::empty(4);
        wallet.credit(Decimal::MAX, "a".into(), Utc::now()).unwrap();
        let before = wallet.clone();
        assert!(wallet.credit(Decimal::ONE, "b".into(), Utc::now()).is_err());
        assert_eq!(wallet, before);
    }

    #[test]
    fn description_names_order_and_level() {
        let order = Uuid::nil();
        let d = commission_description(order, 9, 3);
        assert!(d.contains("Level 3"));
        assert!(d.contains(&order.to_string()));
    }
}
