use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error messages shared between handlers and tests.
pub mod msg {
    pub const EMPTY_CART: &str = "Cart is empty";
    pub const INVALID_QUANTITY: &str = "Quantity must be between 1 and 100";
    pub const NEGATIVE_PRICE: &str = "Unit price cannot be negative";
    pub const UNKNOWN_PRODUCT: &str = "Cart references an unknown product";
    pub const EMAIL_REQUIRED: &str = "An email address is required for guest checkout";

    pub const PRODUCT_NOT_FOUND: &str = "Product not found";
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const ORDER_NOT_FOUND: &str = "Order not found";

    pub const FULFILLMENT_FAILED: &str = "Order could not be fulfilled";
    pub const OUT_OF_STOCK: &str = "Out of stock";
    pub const PROVIDER_UNAVAILABLE: &str = "Payment provider unavailable, please retry";

    pub const STRIPE_NOT_CONFIGURED: &str = "Stripe is not configured";
    pub const PAYPAL_NOT_CONFIGURED: &str = "PayPal is not configured";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";

    pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
    pub const INVALID_TWO_FACTOR_CODE: &str = "Invalid two-factor code";
    pub const EMAIL_TAKEN: &str = "Email already registered";
    pub const USERNAME_TAKEN: &str = "Username already taken";

    pub const CAPTCHA_REQUIRED: &str = "reCAPTCHA token is required";
    pub const CAPTCHA_FAILED: &str = "reCAPTCHA verification failed";
    pub const CAPTCHA_LOW_SCORE: &str = "Low reCAPTCHA score, possible bot";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Order not found")]
    OrderNotFound,

    /// Product id is kept for the operator log and never returned to the buyer.
    #[error("License keys exhausted for product {0}")]
    LicenseExhausted(String),

    #[error("Out of stock for product {0}")]
    OutOfStock(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Payment not completed: {0}")]
    PaymentIncomplete(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Inventory shortfalls: the order stays retryable once an admin restocks.
    pub fn is_inventory_shortfall(&self) -> bool {
        matches!(self, AppError::LicenseExhausted(_) | AppError::OutOfStock(_))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::InvalidCart(msg) => (StatusCode::BAD_REQUEST, "Invalid cart", Some(msg.clone())),
            AppError::OrderNotFound => (
                StatusCode::NOT_FOUND,
                "Order not found",
                Some(msg::ORDER_NOT_FOUND.to_string()),
            ),
            AppError::LicenseExhausted(product_id) => {
                tracing::warn!(product_id = %product_id, "License pool exhausted");
                (
                    StatusCode::CONFLICT,
                    "License inventory exhausted",
                    Some(msg::FULFILLMENT_FAILED.to_string()),
                )
            }
            AppError::OutOfStock(product_id) => {
                tracing::warn!(product_id = %product_id, "Product out of stock");
                (StatusCode::CONFLICT, "Out of stock", Some(msg::OUT_OF_STOCK.to_string()))
            }
            AppError::InsufficientBalance => {
                (StatusCode::PAYMENT_REQUIRED, "Insufficient balance", None)
            }
            AppError::PaymentIncomplete(status) => (
                StatusCode::PAYMENT_REQUIRED,
                "Payment not completed",
                Some(status.clone()),
            ),
            AppError::ProviderUnavailable(reason) => {
                tracing::error!("Upstream provider unavailable: {}", reason);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Provider unavailable",
                    Some(msg::PROVIDER_UNAVAILABLE.to_string()),
                )
            }
            AppError::InvalidSignature => {
                tracing::warn!("Rejected webhook with invalid signature");
                (StatusCode::UNAUTHORIZED, "Invalid signature", None)
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
