pub mod admin;
pub mod public;
pub mod webhooks;

use axum::Router;

use crate::config::RateLimitConfig;
use crate::db::AppState;

/// Every route the service exposes.
pub fn router(state: AppState, limits: Option<RateLimitConfig>) -> Router<AppState> {
    Router::new()
        .merge(public::router(state.clone(), limits))
        .merge(webhooks::router())
        .merge(admin::router(state))
}
