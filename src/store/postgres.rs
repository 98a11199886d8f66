use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use super::{ReferralStore, UnitOfWork};
use crate::chain::ReferralChain;
use crate::settings::{SettingsSnapshot, TIERS_CATEGORY};
use crate::types::{OrderId, ReferralCommission, User, UserId};
use crate::wallet::{Wallet, WalletTransaction};

const USER_COLUMNS: &str =
    "id, total_purchase_amount, referral_unlocked, referral_code, referred_by, created_at";

/// Postgres-backed store. Row locks (`FOR UPDATE`) serialize purchases of the
/// same buyer; wallet rows are serialized by their upsert.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        total_purchase_amount: row.try_get("total_purchase_amount")?,
        referral_unlocked: row.try_get("referral_unlocked")?,
        referral_code: row.try_get("referral_code")?,
        referred_by: row.try_get("referred_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn chain_from_row(user_id: UserId, row: &PgRow) -> Result<ReferralChain> {
    let levels: Vec<Option<i64>> = row.try_get("levels")?;
    Ok(ReferralChain::from_levels(user_id, &levels))
}

fn commission_from_row(row: &PgRow) -> Result<ReferralCommission> {
    let commission_type: String = row.try_get("commission_type")?;
    Ok(ReferralCommission {
        order_id: row.try_get("order_id")?,
        order_item_id: row.try_get("order_item_id")?,
        buyer_id: row.try_get("buyer_id")?,
        referrer_id: row.try_get("referrer_id")?,
        level: row.try_get("level")?,
        selling_amount: row.try_get("selling_amount")?,
        cost_amount: row.try_get("cost_amount")?,
        gross_profit: row.try_get("gross_profit")?,
        gateway_fee: row.try_get("gateway_fee")?,
        net_profit: row.try_get("net_profit")?,
        commission_percentage: row.try_get("commission_percentage")?,
        commission_amount: row.try_get("commission_amount")?,
        commission_type: commission_type.parse()?,
        buyer_discount_amount: row.try_get("buyer_discount_amount")?,
        created_at: row.try_get("created_at")?,
    })
}

fn settings_from_rows(rows: &[PgRow]) -> Result<SettingsSnapshot> {
    let mut snapshot = SettingsSnapshot::default();
    for row in rows {
        let key: String = row.try_get("key")?;
        let value: String = row.try_get("value")?;
        let category: String = row.try_get("category")?;
        if category == TIERS_CATEGORY {
            snapshot.tiers.insert(key, value);
        } else {
            snapshot.general.insert(key, value);
        }
    }
    Ok(snapshot)
}

const SETTINGS_QUERY: &str = "SELECT key, value, category FROM settings";
const CHAIN_QUERY: &str = "SELECT levels FROM referral_chains WHERE user_id = $1";

#[async_trait]
impl ReferralStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.context("failed to begin transaction")?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn settings(&self) -> Result<SettingsSnapshot> {
        let rows = sqlx::query(SETTINGS_QUERY).fetch_all(&self.pool).await?;
        settings_from_rows(&rows)
    }

    async fn user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn referral_chain(&self, user_id: UserId) -> Result<Option<ReferralChain>> {
        let row = sqlx::query(CHAIN_QUERY)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| chain_from_row(user_id, r)).transpose()
    }

    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let Some(row) = sqlx::query("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let balance: Decimal = row.try_get("balance")?;

        let rows = sqlx::query(
            r#"SELECT amount, description, created_at FROM wallet_transactions
               WHERE user_id = $1 ORDER BY id"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let transactions = rows
            .iter()
            .map(|r| -> Result<WalletTransaction> {
                Ok(WalletTransaction {
                    user_id,
                    amount: r.try_get("amount")?,
                    description: r.try_get("description")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Wallet {
            user_id,
            balance,
            transactions,
        }))
    }

    async fn order_commissions(&self, order_id: OrderId) -> Result<Vec<ReferralCommission>> {
        let rows = sqlx::query(
            r#"SELECT order_id, order_item_id, buyer_id, referrer_id, level,
                      selling_amount, cost_amount, gross_profit, gateway_fee, net_profit,
                      commission_percentage, commission_amount, commission_type,
                      buyer_discount_amount, created_at
               FROM referral_commissions WHERE order_id = $1
               ORDER BY order_item_id, level"#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(commission_from_row).collect()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn settings(&mut self) -> Result<SettingsSnapshot> {
        let rows = sqlx::query(SETTINGS_QUERY).fetch_all(&mut *self.tx).await?;
        settings_from_rows(&rows)
    }

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_referral_code(&mut self, code: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE referral_code = $1"
        ))
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(&mut self, user: &User) -> Result<bool> {
        let res = sqlx::query(
            r#"INSERT INTO users (id, total_purchase_amount, referral_unlocked, referral_code, referred_by, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(user.id)
        .bind(user.total_purchase_amount)
        .bind(user.referral_unlocked)
        .bind(&user.referral_code)
        .bind(user.referred_by)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                // 23505 = unique_violation; the only unique key a new user can hit is the id
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some("23505") {
                        return Ok(false);
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn update_purchase_state(&mut self, user: &User) -> Result<()> {
        sqlx::query(
            r#"UPDATE users
               SET total_purchase_amount = $2, referral_unlocked = $3, referral_code = $4
               WHERE id = $1"#,
        )
        .bind(user.id)
        .bind(user.total_purchase_amount)
        .bind(user.referral_unlocked)
        .bind(&user.referral_code)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn referral_chain(&mut self, user_id: UserId) -> Result<Option<ReferralChain>> {
        let row = sqlx::query(CHAIN_QUERY)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(|r| chain_from_row(user_id, r)).transpose()
    }

    async fn insert_referral_chain(&mut self, chain: &ReferralChain) -> Result<()> {
        sqlx::query("INSERT INTO referral_chains (user_id, levels) VALUES ($1, $2)")
            .bind(chain.user_id)
            .bind(chain.levels.to_vec())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn claim_order(&mut self, order_id: OrderId, buyer_id: UserId) -> Result<bool> {
        let res = sqlx::query(
            r#"INSERT INTO referral_processed_orders (order_id, buyer_id) VALUES ($1, $2)
               ON CONFLICT (order_id) DO NOTHING"#,
        )
        .bind(order_id)
        .bind(buyer_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn apply_order_discount(&mut self, order_id: OrderId, amount: Decimal) -> Result<bool> {
        let res = sqlx::query(
            r#"UPDATE orders
               SET discount_amount = discount_amount + $2, total_amount = total_amount - $2
               WHERE id = $1"#,
        )
        .bind(order_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn insert_commission(&mut self, r: &ReferralCommission) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO referral_commissions (
                   order_id, order_item_id, buyer_id, referrer_id, level,
                   selling_amount, cost_amount, gross_profit, gateway_fee, net_profit,
                   commission_percentage, commission_amount, commission_type,
                   buyer_discount_amount, created_at
               ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(r.order_id)
        .bind(r.order_item_id)
        .bind(r.buyer_id)
        .bind(r.referrer_id)
        .bind(r.level)
        .bind(r.selling_amount)
        .bind(r.cost_amount)
        .bind(r.gross_profit)
        .bind(r.gateway_fee)
        .bind(r.net_profit)
        .bind(r.commission_percentage)
        .bind(r.commission_amount)
        .bind(r.commission_type.as_str())
        .bind(r.buyer_discount_amount)
        .bind(r.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn credit_wallet(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO wallets (user_id, balance) VALUES ($1, $2)
               ON CONFLICT (user_id) DO UPDATE SET balance = wallets.balance + EXCLUDED.balance"#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO wallet_transactions (user_id, amount, description, created_at)
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(description)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("failed to commit transaction")?;
        Ok(())
    }
}
