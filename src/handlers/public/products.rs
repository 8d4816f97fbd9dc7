use axum::extract::{Extension, State};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::fulfillment::purchase::{self, PurchaseReceipt};
use crate::middleware::UserContext;
use crate::models::Product;

pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_products(&conn)?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>> {
    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()))?;
    Ok(Json(product))
}

/// Buy one unit with the caller's stored balance.
pub async fn purchase_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Json<PurchaseReceipt>> {
    let mut conn = state.db.get()?;
    let receipt = purchase::purchase_product(&mut conn, &ctx.user, &id)?;
    Ok(Json(receipt))
}
