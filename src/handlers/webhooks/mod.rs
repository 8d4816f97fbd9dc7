//! Provider webhooks. Signatures are checked before the body is parsed; a
//! redelivered event simply re-runs the idempotent fulfillment engine.

mod paypal;
mod stripe;

pub use paypal::*;
pub use stripe::*;

use axum::{Router, routing::post};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::fulfillment::{PaymentConfirmation, fulfill_order};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/stripe", post(handle_stripe_webhook))
        .route("/webhooks/paypal", post(handle_paypal_webhook))
}

/// Map a verification outcome to `InvalidSignature` unless it passed.
/// Malformed headers count as invalid; a misconfigured secret stays internal.
fn require_valid_signature(outcome: Result<bool>) -> Result<()> {
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) | Err(AppError::BadRequest(_)) => Err(AppError::InvalidSignature),
        Err(e) => Err(e),
    }
}

fn fulfill(state: &AppState, confirmation: PaymentConfirmation) -> Result<()> {
    let mut conn = state.db.get()?;
    let result = fulfill_order(&mut conn, &confirmation)?;
    tracing::info!(
        order_id = %result.order_id,
        licenses = result.licenses.len(),
        "Webhook confirmation processed"
    );
    Ok(())
}
