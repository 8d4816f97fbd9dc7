use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::StripeConfig;
use crate::error::{AppError, Result, msg};

use super::{
    CheckoutSession, ProviderFuture, SessionGateway, SessionRequest, SessionStatus,
    error_for_status, http_client, transport_error,
};

type HmacSha256 = Hmac<Sha256>;

const PROVIDER: &str = "Stripe";

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Create a one-off payment session with inline `price_data` per line.
    pub async fn create_checkout_session(&self, request: &SessionRequest) -> Result<CheckoutSession> {
        let currency = request.currency.to_lowercase();
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("customer_email".into(), request.buyer_email.clone()),
            ("client_reference_id".into(), request.order_id.clone()),
            ("metadata[order_id]".into(), request.order_id.clone()),
        ];
        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((format!("{}[price_data][currency]", prefix), currency.clone()));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_price_cents.to_string(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_for_status(PROVIDER, response).await);
        }

        let session: StripeCheckoutSession = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Stripe response: {}", e)))?;

        let url = session
            .url
            .ok_or_else(|| AppError::Internal("Stripe session has no checkout URL".into()))?;

        Ok(CheckoutSession { id: session.id, url })
    }

    pub async fn retrieve_checkout_session(&self, session_id: &str) -> Result<SessionStatus> {
        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.api_base,
                urlencoding::encode(session_id)
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_for_status(PROVIDER, response).await);
        }

        let session: StripeCheckoutSession = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Stripe response: {}", e)))?;

        Ok(session.into_status())
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Future timestamps beyond this skew are rejected (in seconds).
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Signature length is not secret (always 64 hex chars)
        if expected.len() != sig_v1.len() {
            return Ok(false);
        }

        Ok(expected.as_bytes().ct_eq(sig_v1.as_bytes()).into())
    }
}

impl SessionGateway for StripeClient {
    fn create_session<'a>(&'a self, request: &'a SessionRequest) -> ProviderFuture<'a, CheckoutSession> {
        Box::pin(self.create_checkout_session(request))
    }

    fn retrieve_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, SessionStatus> {
        Box::pin(self.retrieve_checkout_session(session_id))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<bool> {
        self.verify_webhook_signature(payload, signature)
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.* ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub payment_status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

impl StripeCheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    pub fn into_status(self) -> SessionStatus {
        let paid = self.is_paid();
        SessionStatus {
            id: self.id,
            paid,
            payment_status: self.payment_status,
            transaction_id: self.payment_intent,
        }
    }
}
