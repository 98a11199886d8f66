use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use referral_commission::{AppState, config::Config, init_pool, init_router, store::PgStore};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let pool = init_pool(&config).await?;
    let app = init_router(AppState::new(Arc::new(PgStore::new(pool))));

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
