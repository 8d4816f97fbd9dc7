//! Persistent order records and their lifecycle transitions.
//!
//! Every transition is a compare-and-swap on the current status, so a stale
//! caller can never move an order backwards.

use std::collections::{HashMap, VecDeque};

use rusqlite::{Connection, TransactionBehavior, params};
use serde::Serialize;

use crate::db::from_row::{LICENSE_KEY_COLS, ORDER_COLS, ORDER_ITEM_COLS, query_all, query_one};
use crate::db::queries::{gen_id, get_product_by_id, now};
use crate::error::{AppError, Result};
use crate::models::{CartItem, LicenseKey, Order, OrderItem, OrderStatus};
use crate::payments::PaymentProvider;

/// A pending order about to be written, keyed by the provider's id.
#[derive(Debug)]
pub struct NewOrder<'a> {
    pub id: &'a str,
    pub correlation_id: &'a str,
    pub provider: PaymentProvider,
    pub user_id: Option<&'a str>,
    pub buyer_email: &'a str,
    pub currency: &'a str,
    pub items: &'a [CartItem],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignedLicense {
    pub product_id: String,
    pub product_name: String,
    pub license_key: Option<String>,
    pub download_link: Option<String>,
}

/// What the buyer receives for a fulfilled order. Rebuilt from persisted rows
/// on every call, so repeated confirmations see the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FulfillmentResult {
    pub order_id: String,
    pub correlation_id: String,
    pub transaction_id: Option<String>,
    pub status: OrderStatus,
    pub licenses: Vec<AssignedLicense>,
}

/// Sum of quantity x snapshot price over the cart.
pub fn order_total_cents(items: &[CartItem]) -> Result<i64> {
    items.iter().try_fold(0i64, |total, item| {
        item.quantity
            .checked_mul(item.unit_price_cents)
            .and_then(|line| total.checked_add(line))
            .ok_or_else(|| AppError::InvalidCart("Order total overflows".into()))
    })
}

/// Write an order and its items in one transaction, status `pending`.
pub fn create_pending_order(conn: &mut Connection, new: &NewOrder) -> Result<Order> {
    let total_cents = order_total_cents(new.items)?;
    let now = now();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO orders (id, correlation_id, provider, user_id, buyer_email, total_cents, currency, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            new.id,
            new.correlation_id,
            new.provider.as_ref(),
            new.user_id,
            new.buyer_email,
            total_cents,
            new.currency,
            OrderStatus::Pending.as_ref(),
            now,
        ],
    )?;
    for (position, item) in new.items.iter().enumerate() {
        tx.execute(
            "INSERT INTO order_items (id, order_id, position, product_id, quantity, unit_price_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                gen_id(),
                new.id,
                position as i64,
                &item.product_id,
                item.quantity,
                item.unit_price_cents,
            ],
        )?;
    }
    tx.commit()?;

    Ok(Order {
        id: new.id.to_string(),
        correlation_id: new.correlation_id.to_string(),
        provider: new.provider,
        user_id: new.user_id.map(String::from),
        buyer_email: new.buyer_email.to_string(),
        total_cents,
        currency: new.currency.to_string(),
        status: OrderStatus::Pending,
        transaction_id: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
        fulfilled_at: None,
    })
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_correlation_id(conn: &Connection, correlation_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE correlation_id = ?1", ORDER_COLS),
        &[&correlation_id],
    )
}

/// Look up the order a payment confirmation refers to.
pub fn resolve(conn: &Connection, correlation_id: &str) -> Result<Order> {
    get_order_by_correlation_id(conn, correlation_id)?.ok_or(AppError::OrderNotFound)
}

pub fn list_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY position",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

pub fn list_orders(conn: &Connection, status: Option<OrderStatus>) -> Result<Vec<Order>> {
    match status {
        Some(status) => query_all(
            conn,
            &format!(
                "SELECT {} FROM orders WHERE status = ?1 ORDER BY created_at DESC, rowid DESC",
                ORDER_COLS
            ),
            &[&status.as_ref()],
        ),
        None => query_all(
            conn,
            &format!("SELECT {} FROM orders ORDER BY created_at DESC, rowid DESC", ORDER_COLS),
            &[],
        ),
    }
}

fn ensure_transition(order: &Order, next: OrderStatus) -> Result<()> {
    if order.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "Order {} cannot move from {} to {}",
            order.id,
            order.status.as_ref(),
            next.as_ref()
        )))
    }
}

fn changed_concurrently(order: &Order) -> AppError {
    AppError::Conflict(format!("Order {} changed concurrently", order.id))
}

/// `pending|failed -> paid`. The first recorded transaction id is kept.
pub fn mark_paid(conn: &Connection, order: &Order, transaction_id: Option<&str>) -> Result<()> {
    ensure_transition(order, OrderStatus::Paid)?;
    let affected = conn.execute(
        "UPDATE orders
         SET status = ?1, transaction_id = COALESCE(transaction_id, ?2), failure_reason = NULL, updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![
            OrderStatus::Paid.as_ref(),
            transaction_id,
            now(),
            &order.id,
            order.status.as_ref(),
        ],
    )?;
    if affected == 0 {
        return Err(changed_concurrently(order));
    }
    Ok(())
}

/// `paid -> fulfilled`.
pub fn mark_fulfilled(conn: &Connection, order_id: &str) -> Result<()> {
    let now = now();
    let affected = conn.execute(
        "UPDATE orders SET status = ?1, fulfilled_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![
            OrderStatus::Fulfilled.as_ref(),
            now,
            order_id,
            OrderStatus::Paid.as_ref(),
        ],
    )?;
    if affected == 0 {
        return Err(AppError::Conflict(format!("Order {} is not paid", order_id)));
    }
    Ok(())
}

/// Record an unrecoverable allocation failure. A fulfilled order is left
/// untouched; an already failed one gets the latest reason.
pub fn mark_failed(
    conn: &Connection,
    order_id: &str,
    transaction_id: Option<&str>,
    reason: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders
         SET status = ?1, failure_reason = ?2, transaction_id = COALESCE(transaction_id, ?3), updated_at = ?4
         WHERE id = ?5 AND status IN (?6, ?7, ?1)",
        params![
            OrderStatus::Failed.as_ref(),
            reason,
            transaction_id,
            now(),
            order_id,
            OrderStatus::Pending.as_ref(),
            OrderStatus::Paid.as_ref(),
        ],
    )?;
    Ok(affected > 0)
}

/// Rebuild the buyer-facing result from the order's persisted items and the
/// keys bound to it.
///
/// Licensed lines yield one entry per claimed key, in claim order. Lines
/// without keys yield a single entry with no key.
pub fn recorded_result(conn: &Connection, order: &Order) -> Result<FulfillmentResult> {
    let items = list_order_items(conn, &order.id)?;
    let keys: Vec<LicenseKey> = query_all(
        conn,
        &format!(
            "SELECT {} FROM license_keys WHERE order_id = ?1 ORDER BY consumed_at, created_at, rowid",
            LICENSE_KEY_COLS
        ),
        &[&order.id],
    )?;

    let mut by_product: HashMap<String, VecDeque<String>> = HashMap::new();
    for key in keys {
        by_product.entry(key.product_id).or_default().push_back(key.key);
    }

    let mut licenses = Vec::new();
    for item in &items {
        let product = get_product_by_id(conn, &item.product_id)?.ok_or_else(|| {
            AppError::Internal(format!(
                "Order {} references missing product {}",
                order.id, item.product_id
            ))
        })?;

        let claimed: Vec<String> = match by_product.get_mut(&item.product_id) {
            Some(queue) => (0..item.quantity).filter_map(|_| queue.pop_front()).collect(),
            None => Vec::new(),
        };

        if claimed.is_empty() {
            licenses.push(AssignedLicense {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                license_key: None,
                download_link: product.download_link.clone(),
            });
        }
        for key in claimed {
            licenses.push(AssignedLicense {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                license_key: Some(key),
                download_link: product.download_link.clone(),
            });
        }
    }

    Ok(FulfillmentResult {
        order_id: order.id.clone(),
        correlation_id: order.correlation_id.clone(),
        transaction_id: order.transaction_id.clone(),
        status: order.status,
        licenses,
    })
}
