use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::db::queries::{decrement_stock, get_product_by_id};
use crate::error::{AppError, Result};
use crate::models::{Order, OrderStatus};

use super::ledger::{self, FulfillmentResult};
use super::pool::{self, Claimant};

/// Where a payment confirmation came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    Webhook,
    Capture,
    Redirect,
}

/// A provider's statement that the payment behind `correlation_id` settled.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub correlation_id: String,
    pub transaction_id: Option<String>,
    pub source: ConfirmationSource,
}

/// Fulfill the order behind a confirmed payment, exactly once.
///
/// Keys are claimed, stock is decremented and the order is marked fulfilled
/// in one IMMEDIATE transaction. Any confirmation after the first returns the
/// recorded result and changes nothing. If a licensed product runs out of keys
/// or stock, nothing is kept: the order is marked `failed` with the reason and
/// a later confirmation retries it.
pub fn fulfill_order(conn: &mut Connection, confirmation: &PaymentConfirmation) -> Result<FulfillmentResult> {
    let order = ledger::resolve(conn, &confirmation.correlation_id)?;

    if order.status == OrderStatus::Fulfilled {
        info!(
            order_id = %order.id,
            source = ?confirmation.source,
            "Order already fulfilled, returning recorded result"
        );
        return ledger::recorded_result(conn, &order);
    }

    if let Err(e) = allocate_and_commit(conn, &order.id, confirmation) {
        if e.is_inventory_shortfall() {
            let reason = e.to_string();
            warn!(order_id = %order.id, reason = %reason, "Fulfillment rolled back");
            if let Err(mark_err) =
                ledger::mark_failed(conn, &order.id, confirmation.transaction_id.as_deref(), &reason)
            {
                error!(order_id = %order.id, "Failed to record fulfillment failure: {}", mark_err);
            }
        }
        return Err(e);
    }

    let order = ledger::get_order_by_id(conn, &order.id)?.ok_or(AppError::OrderNotFound)?;
    ledger::recorded_result(conn, &order)
}

fn allocate_and_commit(
    conn: &mut Connection,
    order_id: &str,
    confirmation: &PaymentConfirmation,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    // Re-read under the write lock: a concurrent delivery may have won.
    let order = ledger::get_order_by_id(&tx, order_id)?.ok_or(AppError::OrderNotFound)?;
    if order.status == OrderStatus::Fulfilled {
        debug!(order_id, "Order fulfilled by a concurrent confirmation");
        return Ok(());
    }

    ledger::mark_paid(&tx, &order, confirmation.transaction_id.as_deref())?;
    allocate(&tx, &order)?;
    ledger::mark_fulfilled(&tx, &order.id)?;
    tx.commit()?;

    info!(
        order_id = %order.id,
        correlation_id = %order.correlation_id,
        source = ?confirmation.source,
        "Order fulfilled"
    );
    Ok(())
}

fn allocate(tx: &Transaction, order: &Order) -> Result<()> {
    let claimant = Claimant {
        email: &order.buyer_email,
        user_id: order.user_id.as_deref(),
        order_id: Some(&order.id),
        purchase_id: None,
    };

    for item in ledger::list_order_items(tx, &order.id)? {
        let product = get_product_by_id(tx, &item.product_id)?.ok_or_else(|| {
            AppError::Internal(format!(
                "Order {} references missing product {}",
                order.id, item.product_id
            ))
        })?;

        if product.needs_license {
            for _ in 0..item.quantity {
                pool::claim_one(tx, &product.id, &claimant)?.into_result(&product.id)?;
            }
        }

        if !decrement_stock(tx, &product.id, item.quantity)? {
            return Err(AppError::OutOfStock(product.id));
        }
    }
    Ok(())
}
