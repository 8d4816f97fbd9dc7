mod auth;
mod checkout;
mod products;

pub use auth::*;
pub use checkout::*;
pub use products::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::extractors::Json;
use crate::middleware::user_auth;
use crate::rate_limit;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Public surface. Rate limits need peer addresses, so tests pass `None`.
pub fn router(state: AppState, limits: Option<RateLimitConfig>) -> Router<AppState> {
    // Credential checks and provider session creation
    let mut strict = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/2fa/verify", post(verify_two_factor))
        .route("/checkout/stripe", post(create_stripe_checkout))
        .route("/checkout/paypal", post(create_paypal_checkout));

    // Confirmation calls that reach the provider
    let mut standard = Router::new()
        .route("/checkout/stripe/confirm", get(confirm_stripe_checkout))
        .route(
            "/checkout/paypal/{paypal_order_id}/capture",
            post(capture_paypal_order),
        );

    if let Some(limits) = limits {
        strict = strict.layer(rate_limit::strict_layer(limits.strict_rpm));
        standard = standard.layer(rate_limit::standard_layer(limits.standard_rpm));
    }

    let authenticated = Router::new()
        .route("/auth/profile", get(get_profile))
        .route("/auth/profile/password", post(change_password))
        .route("/auth/profile/email", post(change_email))
        .route("/auth/2fa/setup", post(setup_two_factor))
        .route("/auth/2fa/enable", post(enable_two_factor))
        .route("/auth/2fa/disable", post(disable_two_factor))
        .route("/products/{id}/purchase", post(purchase_product))
        .layer(middleware::from_fn_with_state(state, user_auth));

    Router::new()
        .route("/health", get(health))
        .route("/products", get(list_products))
        .route("/products/{id}", get(get_product))
        .route("/checkout/cancelled", get(checkout_cancelled))
        .merge(strict)
        .merge(standard)
        .merge(authenticated)
}
