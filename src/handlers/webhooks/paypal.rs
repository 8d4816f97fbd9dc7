use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::fulfillment::{ConfirmationSource, PaymentConfirmation};
use crate::payments::{PayPalCaptureResource, PayPalWebhookEvent};
use crate::util::header_str;

use super::{fulfill, require_valid_signature};

const CAPTURE_COMPLETED: &str = "PAYMENT.CAPTURE.COMPLETED";

pub async fn handle_paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str)> {
    let gateway = state.gateways.paypal()?;
    let signature =
        header_str(&headers, "paypal-transmission-sig").ok_or(AppError::InvalidSignature)?;
    require_valid_signature(gateway.verify_webhook(&body, signature))?;

    let event: PayPalWebhookEvent = serde_json::from_slice(&body)?;
    if event.event_type != CAPTURE_COMPLETED {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring PayPal event");
        return Ok((StatusCode::OK, "Event ignored"));
    }

    let capture: PayPalCaptureResource = serde_json::from_value(event.resource)?;
    let Some(order_id) = capture.order_id() else {
        tracing::warn!(capture_id = %capture.id, "PayPal capture without related order id");
        return Ok((StatusCode::OK, "Event ignored"));
    };

    fulfill(
        &state,
        PaymentConfirmation {
            correlation_id: order_id.to_string(),
            transaction_id: Some(capture.id.clone()),
            source: ConfirmationSource::Webhook,
        },
    )?;

    Ok((StatusCode::OK, "OK"))
}
