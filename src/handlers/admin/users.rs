use axum::extract::{Extension, State};
use serde::Deserialize;

use crate::auth::{Capability, authorize};
use crate::db::{AppState, queries};
use crate::db::queries::DashboardStats;
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::UserContext;
use crate::models::{User, UserProfile};

#[derive(Debug, Deserialize)]
pub struct CreditBalance {
    pub amount_cents: i64,
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<Vec<User>>> {
    authorize(&ctx.user, Capability::ManageUsers).require()?;

    let conn = state.db.get()?;
    Ok(Json(queries::list_users(&conn)?))
}

pub async fn credit_balance(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
    Json(input): Json<CreditBalance>,
) -> Result<Json<UserProfile>> {
    authorize(&ctx.user, Capability::ManageUsers).require()?;

    if input.amount_cents <= 0 {
        return Err(AppError::BadRequest("amount_cents must be positive".into()));
    }

    let conn = state.db.get()?;
    if !queries::credit_user_balance(&conn, &id, input.amount_cents)? {
        return Err(AppError::NotFound(msg::USER_NOT_FOUND.into()));
    }
    let user = queries::get_user_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(msg::USER_NOT_FOUND.into()))?;
    tracing::info!(
        user_id = %id,
        amount_cents = input.amount_cents,
        admin = %ctx.user.id,
        "Credited balance"
    );

    let current = queries::get_current_license(&conn, &user)?;
    Ok(Json(UserProfile::new(user, current)))
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<DashboardStats>> {
    authorize(&ctx.user, Capability::ViewDashboard).require()?;

    let conn = state.db.get()?;
    Ok(Json(queries::dashboard_stats(&conn)?))
}
