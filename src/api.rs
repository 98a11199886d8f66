use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::chain::ReferralChain;
use crate::engine::{self, Referrer};
use crate::error::{ApiError, ApiErrorWithMeta, E_DB_FAILURE, E_USER_NOT_FOUND};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::store::ReferralStore;
use crate::types::{ApplyReport, OrderId, OrderItemInput, PurchaseStanding, ReferralCommission, UserId};
use crate::wallet::{Wallet, WalletTransaction};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The referral store.
    pub store: Arc<dyn ReferralStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn ReferralStore>) -> Self {
        Self { store }
    }
}

/// The request to register a user under an optional referrer.
#[derive(Deserialize)]
pub struct RegisterRequest {
    /// The ID of the new user.
    pub user_id: UserId,
    /// The referral code the user signed up with.
    pub referral_code: Option<String>,
    /// The referrer, when known by ID instead of code.
    pub referred_by: Option<UserId>,
}

/// The request to apply a payment-confirmed order.
#[derive(Deserialize)]
pub struct ApplyOrderRequest {
    /// The ID of the buyer.
    pub buyer_id: UserId,
    /// The order lines.
    pub items: Vec<OrderItemInput>,
}

/// A user's referral chain, nearest ancestor first.
#[derive(Serialize)]
pub struct ChainResponse {
    pub user_id: UserId,
    pub levels: Vec<Option<UserId>>,
}

impl From<ReferralChain> for ChainResponse {
    fn from(chain: ReferralChain) -> Self {
        Self {
            user_id: chain.user_id,
            levels: chain.levels.to_vec(),
        }
    }
}

/// The response for a user's wallet.
#[derive(Serialize)]
pub struct WalletResponse {
    pub user_id: UserId,
    pub balance: Decimal,
    /// Whether the balance equals the sum of the transactions.
    pub reconciled: bool,
    pub transactions: Vec<WalletTransaction>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            user_id: wallet.user_id,
            balance: wallet.balance,
            reconciled: wallet.reconciles(),
            transactions: wallet.transactions,
        }
    }
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/registrations", post(register_handler))
        .route("/users/{user_id}/referral-chain", get(get_chain_handler))
        .route("/users/{user_id}/standing", get(get_standing_handler))
        .route("/orders/{order_id}/referrals", post(apply_order_handler))
        .route("/orders/{order_id}/commissions", get(get_commissions_handler))
        .route("/wallets/{user_id}", get(get_wallet_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

fn db_failure(e: anyhow::Error, meta: &RequestMeta) -> ApiErrorWithMeta {
    ApiError::Internal(e)
        .with_meta(meta.clone())
        .with_code(E_DB_FAILURE)
}

async fn register_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RegisterRequest>,
) -> Result<ApiOk<ChainResponse>, ApiErrorWithMeta> {
    let referrer = match (req.referral_code, req.referred_by) {
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "give either referral_code or referred_by, not both".into(),
            )
            .with_meta(meta));
        }
        (Some(code), None) => Some(Referrer::Code(code)),
        (None, Some(id)) => Some(Referrer::User(id)),
        (None, None) => None,
    };

    let chain = engine::register_user(st.store.as_ref(), req.user_id, referrer)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::created("user registered", chain.into(), meta))
}

async fn get_chain_handler(
    State(st): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<ChainResponse>, ApiErrorWithMeta> {
    let chain = st
        .store
        .referral_chain(user_id)
        .await
        .map_err(|e| db_failure(e, &meta))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("no referral chain for user {user_id}"))
                .with_meta(meta.clone())
                .with_code(E_USER_NOT_FOUND)
        })?;

    Ok(ApiOk::ok("referral chain fetched", chain.into(), meta))
}

async fn get_standing_handler(
    State(st): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<PurchaseStanding>, ApiErrorWithMeta> {
    let standing = engine::purchase_standing(st.store.as_ref(), user_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("standing fetched", standing, meta))
}

async fn apply_order_handler(
    State(st): State<AppState>,
    Path(order_id): Path<OrderId>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ApplyOrderRequest>,
) -> Result<ApiOk<ApplyReport>, ApiErrorWithMeta> {
    let report = engine::apply_order_commissions(st.store.as_ref(), order_id, req.buyer_id, &req.items)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    let message = if report.already_processed {
        "order already processed"
    } else {
        "order referrals applied"
    };
    Ok(ApiOk::ok(message, report, meta))
}

async fn get_commissions_handler(
    State(st): State<AppState>,
    Path(order_id): Path<OrderId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<ReferralCommission>>, ApiErrorWithMeta> {
    let rows = st
        .store
        .order_commissions(order_id)
        .await
        .map_err(|e| db_failure(e, &meta))?;

    Ok(ApiOk::ok("commissions fetched", rows, meta))
}

async fn get_wallet_handler(
    State(st): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<WalletResponse>, ApiErrorWithMeta> {
    let wallet = st
        .store
        .wallet(user_id)
        .await
        .map_err(|e| db_failure(e, &meta))?
        .unwrap_or_else(|| Wallet::empty(user_id));

    Ok(ApiOk::ok("wallet fetched", wallet.into(), meta))
}
