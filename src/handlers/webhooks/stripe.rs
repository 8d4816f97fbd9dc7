use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::fulfillment::{ConfirmationSource, PaymentConfirmation};
use crate::payments::{StripeCheckoutSession, StripeWebhookEvent};
use crate::util::header_str;

use super::{fulfill, require_valid_signature};

/// Session events that mean the buyer has paid (immediately or after a
/// delayed payment method settles).
const FULFILLING_EVENTS: [&str; 2] = [
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
];

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str)> {
    let gateway = state.gateways.stripe()?;
    let signature = header_str(&headers, "stripe-signature").ok_or(AppError::InvalidSignature)?;
    require_valid_signature(gateway.verify_webhook(&body, signature))?;

    let event: StripeWebhookEvent = serde_json::from_slice(&body)?;
    if !FULFILLING_EVENTS.contains(&event.event_type.as_str()) {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring Stripe event");
        return Ok((StatusCode::OK, "Event ignored"));
    }

    let session: StripeCheckoutSession = serde_json::from_value(event.data.object)?;
    if !session.is_paid() {
        tracing::debug!(session_id = %session.id, "Stripe session not paid yet");
        return Ok((StatusCode::OK, "Event ignored"));
    }

    let transaction_id = session.payment_intent.clone().unwrap_or_else(|| session.id.clone());
    fulfill(
        &state,
        PaymentConfirmation {
            correlation_id: session.id,
            transaction_id: Some(transaction_id),
            source: ConfirmationSource::Webhook,
        },
    )?;

    Ok((StatusCode::OK, "OK"))
}
