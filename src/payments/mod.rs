//! Payment provider clients behind object-safe gateway traits.
//!
//! Handlers never talk to a provider directly: `AppState` carries a
//! [`Gateways`] bundle, so tests can swap in fakes.

mod paypal;
mod stripe;

pub use paypal::*;
pub use stripe::*;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::config::Config;
use crate::error::{AppError, Result, msg};

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    PayPal,
}

#[derive(Debug, Clone)]
pub struct LineItem {
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// Redirect-style checkout request (Stripe).
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Internal order id, carried as session metadata for traceability
    pub order_id: String,
    pub buyer_email: String,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub id: String,
    pub paid: bool,
    pub payment_status: String,
    /// Payment intent id when the provider reports one
    pub transaction_id: Option<String>,
}

/// Intent/capture-style order request (PayPal).
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub order_id: String,
    pub currency: String,
    pub total_cents: i64,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone)]
pub struct ProviderOrder {
    pub id: String,
    pub approve_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub status: String,
    pub transaction_id: Option<String>,
}

impl CaptureResult {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("COMPLETED")
    }
}

pub trait SessionGateway: Send + Sync {
    fn create_session<'a>(&'a self, request: &'a SessionRequest) -> ProviderFuture<'a, CheckoutSession>;

    fn retrieve_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, SessionStatus>;

    /// Check a webhook signature header against the shared secret.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<bool>;
}

pub trait CaptureGateway: Send + Sync {
    fn create_order<'a>(&'a self, request: &'a OrderRequest) -> ProviderFuture<'a, ProviderOrder>;

    fn capture_order<'a>(&'a self, provider_order_id: &'a str) -> ProviderFuture<'a, CaptureResult>;

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<bool>;
}

/// Configured providers. A `None` provider rejects its endpoints.
#[derive(Clone, Default)]
pub struct Gateways {
    pub stripe: Option<Arc<dyn SessionGateway>>,
    pub paypal: Option<Arc<dyn CaptureGateway>>,
}

impl Gateways {
    pub fn from_config(config: &Config) -> Result<Self> {
        let stripe = match &config.stripe {
            Some(c) => Some(Arc::new(StripeClient::new(c, config.provider_timeout)?) as Arc<dyn SessionGateway>),
            None => None,
        };
        let paypal = match &config.paypal {
            Some(c) => Some(Arc::new(PayPalClient::new(c, config.provider_timeout)?) as Arc<dyn CaptureGateway>),
            None => None,
        };
        Ok(Self { stripe, paypal })
    }

    pub fn stripe(&self) -> Result<&dyn SessionGateway> {
        self.stripe
            .as_deref()
            .ok_or_else(|| AppError::BadRequest(msg::STRIPE_NOT_CONFIGURED.into()))
    }

    pub fn paypal(&self) -> Result<&dyn CaptureGateway> {
        self.paypal
            .as_deref()
            .ok_or_else(|| AppError::BadRequest(msg::PAYPAL_NOT_CONFIGURED.into()))
    }
}

/// Run a provider call under a deadline. Expiry is `ProviderUnavailable`.
pub async fn bounded<T>(limit: Duration, call: ProviderFuture<'_, T>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::ProviderUnavailable(format!(
            "no response within {}s",
            limit.as_secs_f32()
        ))),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> AppError {
    AppError::ProviderUnavailable(format!("{} request failed: {}", provider, e))
}

/// Map a non-success provider response: 5xx and 429 are retryable, anything
/// else is a request we should not have sent.
pub(crate) async fn error_for_status(provider: &str, response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AppError::ProviderUnavailable(format!("{} returned {}: {}", provider, status, body))
    } else {
        AppError::Internal(format!("{} API error {}: {}", provider, status, body))
    }
}
