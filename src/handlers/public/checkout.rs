use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::crypto::normalize_email;
use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::fulfillment::checkout::{self, Buyer, PayPalCheckout, StripeCheckout};
use crate::fulfillment::{ConfirmationSource, FulfillmentResult, PaymentConfirmation, fulfill_order, ledger};
use crate::middleware::optional_user;
use crate::models::{CartItem, OrderStatus};
use crate::payments::bounded;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartItem>,
    /// Required for guests; ignored when the caller is signed in.
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
struct PendingResponse {
    status: &'static str,
    payment_status: String,
}

#[derive(Debug, Serialize)]
pub struct CancelledResponse {
    pub status: &'static str,
}

/// Signed-in buyers pay as themselves; guests must give an email.
fn resolve_buyer(state: &AppState, headers: &HeaderMap, email: Option<&str>) -> Result<Buyer> {
    if let Some(user) = optional_user(state, headers)? {
        return Ok(Buyer {
            user_id: Some(user.id),
            email: user.email,
        });
    }

    let email = email
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::BadRequest(msg::EMAIL_REQUIRED.into()))?;
    crate::auth::password::validate_email(&email)?;
    Ok(Buyer {
        user_id: None,
        email,
    })
}

/// The recorded result when the order is already fulfilled. Unknown orders
/// are `OrderNotFound`.
fn recorded_if_fulfilled(state: &AppState, correlation_id: &str) -> Result<Option<FulfillmentResult>> {
    let conn = state.db.get()?;
    let order = ledger::resolve(&conn, correlation_id)?;
    if order.status == OrderStatus::Fulfilled {
        tracing::info!(order_id = %order.id, "Order already fulfilled, skipping provider call");
        return Ok(Some(ledger::recorded_result(&conn, &order)?));
    }
    Ok(None)
}

fn run_engine(state: &AppState, confirmation: PaymentConfirmation) -> Result<FulfillmentResult> {
    let mut conn = state.db.get()?;
    fulfill_order(&mut conn, &confirmation)
}

pub async fn create_stripe_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<StripeCheckout>> {
    let buyer = resolve_buyer(&state, &headers, request.email.as_deref())?;
    let checkout = checkout::start_stripe_checkout(&state, &buyer, &request.items).await?;
    Ok(Json(checkout))
}

pub async fn create_paypal_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<PayPalCheckout>> {
    let buyer = resolve_buyer(&state, &headers, request.email.as_deref())?;
    let checkout = checkout::start_paypal_checkout(&state, &buyer, &request.items).await?;
    Ok(Json(checkout))
}

/// Stripe success redirect. Fulfills synchronously when the session is paid,
/// so the buyer sees their keys without waiting for the webhook.
pub async fn confirm_stripe_checkout(
    State(state): State<AppState>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Response> {
    if let Some(result) = recorded_if_fulfilled(&state, &query.session_id)? {
        return Ok(Json(result).into_response());
    }

    let gateway = state.gateways.stripe()?;
    let session = bounded(state.provider_timeout, gateway.retrieve_session(&query.session_id)).await?;
    if !session.paid {
        return Ok((
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                status: "pending",
                payment_status: session.payment_status,
            }),
        )
            .into_response());
    }

    let result = run_engine(
        &state,
        PaymentConfirmation {
            correlation_id: session.id.clone(),
            transaction_id: session.transaction_id.or(Some(session.id)),
            source: ConfirmationSource::Redirect,
        },
    )?;
    Ok(Json(result).into_response())
}

pub async fn capture_paypal_order(
    State(state): State<AppState>,
    Path(paypal_order_id): Path<String>,
) -> Result<Json<FulfillmentResult>> {
    if let Some(result) = recorded_if_fulfilled(&state, &paypal_order_id)? {
        return Ok(Json(result));
    }

    let gateway = state.gateways.paypal()?;
    let capture = bounded(state.provider_timeout, gateway.capture_order(&paypal_order_id)).await?;
    if !capture.is_completed() {
        tracing::info!(
            paypal_order_id = %paypal_order_id,
            status = %capture.status,
            "PayPal capture not completed"
        );
        return Err(AppError::PaymentIncomplete(capture.status));
    }

    let result = run_engine(
        &state,
        PaymentConfirmation {
            correlation_id: paypal_order_id,
            transaction_id: capture.transaction_id,
            source: ConfirmationSource::Capture,
        },
    )?;
    Ok(Json(result))
}

pub async fn checkout_cancelled() -> Json<CancelledResponse> {
    Json(CancelledResponse {
        status: "cancelled",
    })
}
