use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ReferralStore, UnitOfWork};
use crate::chain::ReferralChain;
use crate::settings::{SettingsSnapshot, TIERS_CATEGORY};
use crate::types::{OrderId, ReferralCommission, User, UserId};
use crate::wallet::Wallet;

/// The slice of an order this engine touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOrder {
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub settings: SettingsSnapshot,
    pub users: HashMap<UserId, User>,
    pub chains: HashMap<UserId, ReferralChain>,
    pub orders: HashMap<OrderId, MemoryOrder>,
    pub processed_orders: HashMap<OrderId, UserId>,
    pub commissions: Vec<ReferralCommission>,
    pub wallets: HashMap<UserId, Wallet>,
}

/// In-process store. A unit of work holds the whole state exclusively and
/// works on a copy that replaces the state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn put_setting(&self, category: &str, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        let map = if category == TIERS_CATEGORY {
            &mut state.settings.tiers
        } else {
            &mut state.settings.general
        };
        map.insert(key.to_string(), value.to_string());
    }

    /// Inserts a user together with a chain, bypassing registration.
    pub async fn seed_user(&self, user: User, chain: ReferralChain) {
        let mut state = self.state.lock().await;
        state.chains.insert(user.id, chain);
        state.users.insert(user.id, user);
    }

    pub async fn seed_order(&self, order_id: OrderId, total_amount: Decimal) {
        self.state.lock().await.orders.insert(
            order_id,
            MemoryOrder {
                discount_amount: Decimal::ZERO,
                total_amount,
            },
        );
    }

    pub async fn order(&self, order_id: OrderId) -> Option<MemoryOrder> {
        self.state.lock().await.orders.get(&order_id).copied()
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn settings(&self) -> Result<SettingsSnapshot> {
        Ok(self.state.lock().await.settings.clone())
    }

    async fn user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn referral_chain(&self, user_id: UserId) -> Result<Option<ReferralChain>> {
        Ok(self.state.lock().await.chains.get(&user_id).copied())
    }

    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&user_id).cloned())
    }

    async fn order_commissions(&self, order_id: OrderId) -> Result<Vec<ReferralCommission>> {
        let state = self.state.lock().await;
        let mut rows: Vec<ReferralCommission> = state
            .commissions
            .iter()
            .filter(|c| c.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.order_item_id, c.level));
        Ok(rows)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn settings(&mut self) -> Result<SettingsSnapshot> {
        Ok(self.working.settings.clone())
    }

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn find_user_by_referral_code(&mut self, code: &str) -> Result<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.referral_code.as_deref() == Some(code))
            .cloned())
    }

    async fn insert_user(&mut self, user: &User) -> Result<bool> {
        if self.working.users.contains_key(&user.id) {
            return Ok(false);
        }
        self.working.users.insert(user.id, user.clone());
        Ok(true)
    }

    async fn update_purchase_state(&mut self, user: &User) -> Result<()> {
        let Some(stored) = self.working.users.get_mut(&user.id) else {
            bail!("user {} vanished", user.id);
        };
        stored.total_purchase_amount = user.total_purchase_amount;
        stored.referral_unlocked = user.referral_unlocked;
        stored.referral_code = user.referral_code.clone();
        Ok(())
    }

    async fn referral_chain(&mut self, user_id: UserId) -> Result<Option<ReferralChain>> {
        Ok(self.working.chains.get(&user_id).copied())
    }

    async fn insert_referral_chain(&mut self, chain: &ReferralChain) -> Result<()> {
        if self.working.chains.contains_key(&chain.user_id) {
            bail!("duplicate referral chain for user {}", chain.user_id);
        }
        self.working.chains.insert(chain.user_id, *chain);
        Ok(())
    }

    async fn claim_order(&mut self, order_id: OrderId, buyer_id: UserId) -> Result<bool> {
        if self.working.processed_orders.contains_key(&order_id) {
            return Ok(false);
        }
        self.working.processed_orders.insert(order_id, buyer_id);
        Ok(true)
    }

    async fn apply_order_discount(&mut self, order_id: OrderId, amount: Decimal) -> Result<bool> {
        let Some(order) = self.working.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        order.discount_amount += amount;
        order.total_amount -= amount;
        Ok(true)
    }

    async fn insert_commission(&mut self, record: &ReferralCommission) -> Result<()> {
        let duplicate = self.working.commissions.iter().any(|c| {
            c.order_id == record.order_id
                && c.order_item_id == record.order_item_id
                && c.referrer_id == record.referrer_id
                && c.level == record.level
        });
        if duplicate {
            bail!(
                "duplicate commission for order {} item {} level {}",
                record.order_id,
                record.order_item_id,
                record.level
            );
        }
        self.working.commissions.push(record.clone());
        Ok(())
    }

    async fn credit_wallet(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.working
            .wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::empty(user_id))
            .credit(amount, description.to_string(), at)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_user_insert_reports_false() {
        let store = MemoryStore::new();
        let user = User::new(1, None, Utc::now());

        let mut uow = store.begin().await.unwrap();
        assert!(uow.insert_user(&user).await.unwrap());
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(!uow.insert_user(&user).await.unwrap());
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_user(&User::new(1, None, Utc::now())).await.unwrap();
        }
        assert!(store.user(1).await.unwrap().is_none());
    }
}
