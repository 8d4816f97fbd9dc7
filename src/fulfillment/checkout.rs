//! Checkout initiation: validate the cart, open a provider session, then
//! persist the pending order under the provider's id.
//!
//! The provider is called before anything is written, so a provider failure
//! leaves no trace. Stock is never touched here.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::AppState;
use crate::db::queries::{gen_id, get_product_by_id};
use crate::error::{AppError, Result, msg};
use crate::models::{CartItem, Product};
use crate::payments::{LineItem, OrderRequest, PaymentProvider, SessionRequest, bounded};

use super::ledger::{self, NewOrder};

pub const MAX_QUANTITY: i64 = 100;

/// Who is paying. Signed-in buyers carry their user id.
#[derive(Debug, Clone)]
pub struct Buyer {
    pub user_id: Option<String>,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct StripeCheckout {
    pub order_id: String,
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Serialize)]
pub struct PayPalCheckout {
    pub order_id: String,
    pub paypal_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approve_url: Option<String>,
}

/// Reject empty carts, out-of-range quantities, negative prices and unknown
/// products. Returns each line with its product.
pub fn validate_cart(conn: &Connection, items: &[CartItem]) -> Result<Vec<(CartItem, Product)>> {
    if items.is_empty() {
        return Err(AppError::InvalidCart(msg::EMPTY_CART.into()));
    }

    let mut products: HashMap<&str, Product> = HashMap::new();
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        if !(1..=MAX_QUANTITY).contains(&item.quantity) {
            return Err(AppError::InvalidCart(msg::INVALID_QUANTITY.into()));
        }
        if item.unit_price_cents < 0 {
            return Err(AppError::InvalidCart(msg::NEGATIVE_PRICE.into()));
        }
        let product = match products.get(item.product_id.as_str()) {
            Some(p) => p.clone(),
            None => {
                let p = get_product_by_id(conn, &item.product_id)?
                    .ok_or_else(|| AppError::InvalidCart(msg::UNKNOWN_PRODUCT.into()))?;
                products.insert(&item.product_id, p.clone());
                p
            }
        };
        lines.push((item.clone(), product));
    }

    ledger::order_total_cents(items)?;
    Ok(lines)
}

fn line_items(lines: &[(CartItem, Product)]) -> Vec<LineItem> {
    lines
        .iter()
        .map(|(item, product)| LineItem {
            name: product.name.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
        })
        .collect()
}

pub async fn start_stripe_checkout(
    state: &AppState,
    buyer: &Buyer,
    items: &[CartItem],
) -> Result<StripeCheckout> {
    let gateway = state.gateways.stripe()?;
    let lines = {
        let conn = state.db.get()?;
        validate_cart(&conn, items)?
    };

    let order_id = gen_id();
    let request = SessionRequest {
        order_id: order_id.clone(),
        buyer_email: buyer.email.clone(),
        currency: state.currency.clone(),
        line_items: line_items(&lines),
        success_url: format!(
            "{}/checkout/stripe/confirm?session_id={{CHECKOUT_SESSION_ID}}",
            state.base_url
        ),
        cancel_url: format!("{}/checkout/cancelled", state.base_url),
    };
    let session = bounded(state.provider_timeout, gateway.create_session(&request)).await?;

    let mut conn = state.db.get()?;
    let order = ledger::create_pending_order(
        &mut conn,
        &NewOrder {
            id: &order_id,
            correlation_id: &session.id,
            provider: PaymentProvider::Stripe,
            user_id: buyer.user_id.as_deref(),
            buyer_email: &buyer.email,
            currency: &state.currency,
            items,
        },
    )?;

    tracing::info!(
        order_id = %order.id,
        session_id = %session.id,
        total_cents = order.total_cents,
        "Created Stripe checkout"
    );

    Ok(StripeCheckout {
        order_id: order.id,
        session_id: session.id,
        checkout_url: session.url,
    })
}

pub async fn start_paypal_checkout(
    state: &AppState,
    buyer: &Buyer,
    items: &[CartItem],
) -> Result<PayPalCheckout> {
    let gateway = state.gateways.paypal()?;
    let lines = {
        let conn = state.db.get()?;
        validate_cart(&conn, items)?
    };

    let order_id = gen_id();
    let request = OrderRequest {
        order_id: order_id.clone(),
        currency: state.currency.clone(),
        total_cents: ledger::order_total_cents(items)?,
        line_items: line_items(&lines),
    };
    let provider_order = bounded(state.provider_timeout, gateway.create_order(&request)).await?;

    let mut conn = state.db.get()?;
    let order = ledger::create_pending_order(
        &mut conn,
        &NewOrder {
            id: &order_id,
            correlation_id: &provider_order.id,
            provider: PaymentProvider::PayPal,
            user_id: buyer.user_id.as_deref(),
            buyer_email: &buyer.email,
            currency: &state.currency,
            items,
        },
    )?;

    tracing::info!(
        order_id = %order.id,
        paypal_order_id = %provider_order.id,
        total_cents = order.total_cents,
        "Created PayPal order"
    );

    Ok(PayPalCheckout {
        order_id: order.id,
        paypal_order_id: provider_order.id,
        approve_url: provider_order.approve_url,
    })
}
