//! Admin surface. Every handler runs behind [`user_auth`] and checks its own
//! capability before touching the store.

mod catalog;
mod sales;
mod users;

pub use catalog::*;
pub use sales::*;
pub use users::*;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::db::AppState;
use crate::middleware::user_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Catalog
        .route("/admin/products", post(create_product).get(list_products))
        .route(
            "/admin/products/{id}",
            put(update_product).delete(delete_product),
        )
        // Inventory
        .route(
            "/admin/products/{id}/stock/infinite",
            post(set_infinite_stock),
        )
        .route(
            "/admin/products/{id}/keys",
            post(import_keys).get(list_keys),
        )
        // Sales
        .route("/admin/orders", get(list_orders))
        .route("/admin/purchases", get(list_purchases))
        // Users and dashboard
        .route("/admin/users", get(list_users))
        .route("/admin/users/{id}/balance", post(credit_balance))
        .route("/admin/dashboard", get(dashboard))
        .layer(middleware::from_fn_with_state(state, user_auth))
}
