//! Direct purchase paid from the buyer's stored balance.

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::db::queries::{
    create_purchase, debit_user_balance, decrement_stock, gen_id, get_product_by_id,
};
use crate::error::{AppError, Result, msg};
use crate::models::User;

use super::pool::{self, Claimant};

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub purchase_id: String,
    pub product_id: String,
    pub product_name: String,
    pub license_key: Option<String>,
    pub download_link: Option<String>,
    pub amount_paid_cents: i64,
}

/// Buy one unit of `product_id` for `user`.
///
/// Stock check, key claim, balance debit, purchase record and stock decrement
/// share one IMMEDIATE transaction; any failure leaves no purchase and no
/// consumed key.
pub fn purchase_product(conn: &mut Connection, user: &User, product_id: &str) -> Result<PurchaseReceipt> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let product = get_product_by_id(&tx, product_id)?
        .ok_or_else(|| AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()))?;
    if product.is_sold_out() {
        return Err(AppError::OutOfStock(product.id));
    }

    let purchase_id = gen_id();
    let license_key = if product.needs_license {
        let claimant = Claimant {
            email: &user.email,
            user_id: Some(&user.id),
            order_id: None,
            purchase_id: Some(&purchase_id),
        };
        let key = pool::claim_one(&tx, &product.id, &claimant)?.into_result(&product.id)?;
        Some(key.key)
    } else {
        None
    };

    if !debit_user_balance(&tx, &user.id, product.price_cents)? {
        return Err(AppError::InsufficientBalance);
    }

    create_purchase(
        &tx,
        &purchase_id,
        &user.id,
        &product.id,
        license_key.as_deref(),
        product.price_cents,
    )?;

    if !decrement_stock(&tx, &product.id, 1)? {
        return Err(AppError::OutOfStock(product.id));
    }

    tx.commit()?;

    tracing::info!(
        purchase_id = %purchase_id,
        user_id = %user.id,
        product_id = %product.id,
        "Direct purchase completed"
    );

    Ok(PurchaseReceipt {
        purchase_id,
        product_id: product.id,
        product_name: product.name,
        license_key,
        download_link: product.download_link,
        amount_paid_cents: product.price_cents,
    })
}
