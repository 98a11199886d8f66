//! Multi-level referral commission engine.
//!
//! A payment-confirmed order is turned into an updated buyer purchase tier,
//! an optional buyer discount, and commission payouts to up to eight ancestor
//! referrers, all computed from per-item net profit.

mod api;
pub mod chain;
pub mod config;
pub mod discount;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod money;
pub mod profit;
mod responses;
pub mod settings;
pub mod store;
pub mod tier;
pub mod types;
pub mod wallet;

use anyhow::Context;
use anyhow::Result;
pub use api::{AppState, init_router};
pub use engine::{
    Referrer, apply_order_commissions, process_order_referrals, purchase_standing, register_user,
};
pub use error::EngineError;
use sqlx::{PgPool, postgres::PgPoolOptions};

/// Initializes the database pool and brings the schema up to date.
pub async fn init_pool(config: &crate::config::Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}
