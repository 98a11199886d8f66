//! Persistence seam. The engine only talks to a [`ReferralStore`] and the
//! [`UnitOfWork`] it opens; everything inside one unit of work commits or
//! rolls back together.

mod memory;
mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::chain::ReferralChain;
use crate::settings::SettingsSnapshot;
use crate::types::{OrderId, ReferralCommission, User, UserId};
use crate::wallet::Wallet;

pub use memory::{MemoryOrder, MemoryState, MemoryStore};
pub use postgres::PgStore;

#[async_trait]
pub trait ReferralStore: Send + Sync + 'static {
    /// Opens a unit of work. Dropping it without [`UnitOfWork::commit`] rolls
    /// everything back.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    async fn settings(&self) -> Result<SettingsSnapshot>;

    async fn user(&self, user_id: UserId) -> Result<Option<User>>;

    async fn referral_chain(&self, user_id: UserId) -> Result<Option<ReferralChain>>;

    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;

    async fn order_commissions(&self, order_id: OrderId) -> Result<Vec<ReferralCommission>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn settings(&mut self) -> Result<SettingsSnapshot>;

    /// Reads a user and holds it against concurrent purchase updates until
    /// the unit of work ends.
    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>>;

    async fn find_user_by_referral_code(&mut self, code: &str) -> Result<Option<User>>;

    /// Returns false if a user with the same id already exists.
    async fn insert_user(&mut self, user: &User) -> Result<bool>;

    /// Persists `total_purchase_amount`, `referral_unlocked` and `referral_code`.
    async fn update_purchase_state(&mut self, user: &User) -> Result<()>;

    async fn referral_chain(&mut self, user_id: UserId) -> Result<Option<ReferralChain>>;

    async fn insert_referral_chain(&mut self, chain: &ReferralChain) -> Result<()>;

    /// Marks the order as applied. Returns false if it already was.
    async fn claim_order(&mut self, order_id: OrderId, buyer_id: UserId) -> Result<bool>;

    /// Adds `amount` to the order's discount and takes it off its total.
    /// Returns false if the order does not exist.
    async fn apply_order_discount(&mut self, order_id: OrderId, amount: Decimal) -> Result<bool>;

    async fn insert_commission(&mut self, record: &ReferralCommission) -> Result<()>;

    /// Appends a wallet transaction and moves the balance with it, creating
    /// the wallet on first credit.
    async fn credit_wallet(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
