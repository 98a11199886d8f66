use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::responses::RequestMeta;
use crate::types::{OrderId, UserId};

pub const E_BAD_ORDER_ITEMS: &str = "BAD_ORDER_ITEMS";
pub const E_BUYER_NOT_FOUND: &str = "BUYER_NOT_FOUND";
pub const E_ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";
pub const E_USER_NOT_FOUND: &str = "USER_NOT_FOUND";
pub const E_USER_CONFLICT: &str = "USER_CONFLICT";
pub const E_UNKNOWN_REFERRAL_CODE: &str = "UNKNOWN_REFERRAL_CODE";
pub const E_SETTINGS: &str = "SETTINGS_INVALID";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

/// Failures of the referral engine. Any of them aborts the whole unit of work.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("order item #{index} is malformed: {reason}")]
    InvalidOrderItem { index: usize, reason: String },
    #[error("order has no items")]
    EmptyOrder,
    #[error("purchase amount must be >= 0, got {0}")]
    InvalidPurchaseAmount(rust_decimal::Decimal),
    #[error("{0} is out of range")]
    AmountOverflow(&'static str),
    #[error("buyer {0} not found")]
    BuyerNotFound(UserId),
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("unknown referral code {0:?}")]
    UnknownReferralCode(String),
    #[error("user {0} is already registered")]
    UserAlreadyRegistered(UserId),
    #[error("settings: {0}")]
    Settings(String),
    #[error("store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl EngineError {
    /// Maps an engine failure onto the HTTP error taxonomy.
    pub fn into_api(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let (error, code) = match self {
            e @ (EngineError::InvalidOrderItem { .. }
            | EngineError::EmptyOrder
            | EngineError::InvalidPurchaseAmount(_)
            | EngineError::AmountOverflow(_)) => {
                (ApiError::BadRequest(e.to_string()), E_BAD_ORDER_ITEMS)
            }
            e @ EngineError::BuyerNotFound(_) => (ApiError::NotFound(e.to_string()), E_BUYER_NOT_FOUND),
            e @ EngineError::OrderNotFound(_) => (ApiError::NotFound(e.to_string()), E_ORDER_NOT_FOUND),
            e @ EngineError::UserNotFound(_) => (ApiError::NotFound(e.to_string()), E_USER_NOT_FOUND),
            e @ EngineError::UnknownReferralCode(_) => {
                (ApiError::BadRequest(e.to_string()), E_UNKNOWN_REFERRAL_CODE)
            }
            e @ EngineError::UserAlreadyRegistered(_) => {
                (ApiError::Conflict(e.to_string()), E_USER_CONFLICT)
            }
            e @ EngineError::Settings(_) => (ApiError::Internal(e.into()), E_SETTINGS),
            EngineError::Store(e) => (ApiError::Internal(e), E_DB_FAILURE),
        };
        error.with_meta(meta).with_code(code)
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
