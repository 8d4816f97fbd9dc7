use axum::extract::{Extension, State};
use serde::Deserialize;

use crate::auth::{Capability, authorize};
use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::fulfillment::ledger;
use crate::middleware::UserContext;
use crate::models::{Order, OrderStatus, PurchaseWithDetails};

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>> {
    authorize(&ctx.user, Capability::ViewSales).require()?;

    let conn = state.db.get()?;
    Ok(Json(ledger::list_orders(&conn, query.status)?))
}

pub async fn list_purchases(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<Vec<PurchaseWithDetails>>> {
    authorize(&ctx.user, Capability::ViewSales).require()?;

    let conn = state.db.get()?;
    Ok(Json(queries::list_purchases_with_details(&conn)?))
}
