use axum::{
    extract::{Extension, State},
    http::StatusCode,
};

use crate::auth::{Capability, authorize};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::UserContext;
use crate::models::{
    CreateProduct, INFINITE_STOCK, ImportKeys, ImportKeysResult, LicenseKey, Product, UpdateProduct,
};

fn validate_price(price_cents: i64) -> Result<()> {
    if price_cents < 0 {
        return Err(AppError::BadRequest("price_cents cannot be negative".into()));
    }
    Ok(())
}

fn validate_stock(stock: Option<i64>) -> Result<()> {
    match stock {
        Some(n) if n < INFINITE_STOCK => Err(AppError::BadRequest(
            "stock must be -1 (infinite), zero or positive".into(),
        )),
        _ => Ok(()),
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(input): Json<CreateProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    authorize(&ctx.user, Capability::ManageCatalog).require()?;

    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("Product name is required".into()));
    }
    validate_price(input.price_cents)?;
    validate_stock(input.stock)?;

    let conn = state.db.get()?;
    if queries::get_product_by_name(&conn, &input.name)?.is_some() {
        return Err(AppError::Conflict(format!(
            "A product named '{}' already exists",
            input.name
        )));
    }
    let product = queries::create_product(&conn, &input)?;
    tracing::info!(product_id = %product.id, admin = %ctx.user.id, "Created product");

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn list_products(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<Vec<Product>>> {
    authorize(&ctx.user, Capability::ManageCatalog).require()?;

    let conn = state.db.get()?;
    Ok(Json(queries::list_products(&conn)?))
}

pub async fn update_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
    Json(input): Json<UpdateProduct>,
) -> Result<Json<Product>> {
    authorize(&ctx.user, Capability::ManageCatalog).require()?;

    if let Some(price) = input.price_cents {
        validate_price(price)?;
    }
    if let Some(stock) = input.stock {
        validate_stock(stock)?;
    }

    let conn = state.db.get()?;
    queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()))?;
    if let Some(name) = &input.name {
        if let Some(other) = queries::get_product_by_name(&conn, name)? {
            if other.id != id {
                return Err(AppError::Conflict(format!(
                    "A product named '{}' already exists",
                    name
                )));
            }
        }
    }

    queries::update_product(&conn, &id, &input)?;
    let product = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()))?;
    Ok(Json(product))
}

/// Products with sales history are kept so orders and purchases stay readable.
pub async fn delete_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    authorize(&ctx.user, Capability::ManageCatalog).require()?;

    let conn = state.db.get()?;
    if queries::get_product_by_id(&conn, &id)?.is_none() {
        return Err(AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()));
    }
    if queries::product_has_sales(&conn, &id)? {
        return Err(AppError::Conflict(
            "Product has orders or purchases and cannot be deleted".into(),
        ));
    }

    queries::delete_product(&conn, &id)?;
    tracing::info!(product_id = %id, admin = %ctx.user.id, "Deleted product");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_infinite_stock(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Json<Product>> {
    authorize(&ctx.user, Capability::ManageInventory).require()?;

    let conn = state.db.get()?;
    if !queries::set_product_stock(&conn, &id, Some(INFINITE_STOCK))? {
        return Err(AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()));
    }
    let product = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()))?;
    Ok(Json(product))
}

pub async fn import_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
    Json(input): Json<ImportKeys>,
) -> Result<Json<ImportKeysResult>> {
    authorize(&ctx.user, Capability::ManageInventory).require()?;

    let mut conn = state.db.get()?;
    let inserted = queries::import_license_keys(&mut conn, &id, &input.keys)?;
    tracing::info!(product_id = %id, inserted, "Imported license keys");

    Ok(Json(ImportKeysResult { inserted }))
}

pub async fn list_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LicenseKey>>> {
    authorize(&ctx.user, Capability::ManageInventory).require()?;

    let conn = state.db.get()?;
    if queries::get_product_by_id(&conn, &id)?.is_none() {
        return Err(AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()));
    }
    Ok(Json(queries::list_license_keys_for_product(&conn, &id)?))
}
