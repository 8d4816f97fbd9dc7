use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::PayPalConfig;
use crate::error::{AppError, Result, msg};
use crate::util::format_cents;

use super::{
    CaptureGateway, CaptureResult, OrderRequest, ProviderFuture, ProviderOrder, error_for_status,
    http_client, transport_error,
};

type HmacSha256 = Hmac<Sha256>;

const PROVIDER: &str = "PayPal";

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnit<'a>>,
}

#[derive(Debug, Serialize)]
struct PurchaseUnit<'a> {
    custom_id: &'a str,
    amount: Amount,
    items: Vec<Item<'a>>,
}

#[derive(Debug, Serialize)]
struct Amount {
    currency_code: String,
    value: String,
    breakdown: Breakdown,
}

#[derive(Debug, Serialize)]
struct Breakdown {
    item_total: Money,
}

#[derive(Debug, Serialize)]
struct Money {
    currency_code: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct Item<'a> {
    name: &'a str,
    quantity: String,
    unit_amount: Money,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnitResponse>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnitResponse {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
}

impl OrderResponse {
    fn into_capture_result(self) -> CaptureResult {
        let transaction_id = self
            .purchase_units
            .into_iter()
            .filter_map(|u| u.payments)
            .flat_map(|p| p.captures)
            .map(|c| c.id)
            .next();
        CaptureResult {
            status: self.status,
            transaction_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayPalClient {
    client: Client,
    client_id: String,
    client_secret: String,
    webhook_secret: String,
    api_base: String,
}

impl PayPalClient {
    pub fn new(config: &PayPalConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Client-credentials token; fetched per call, never cached process-wide.
    async fn access_token(&self) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_for_status(PROVIDER, response).await);
        }

        let token: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse PayPal token: {}", e)))?;
        Ok(token.access_token)
    }

    pub async fn create_checkout_order(&self, request: &OrderRequest) -> Result<ProviderOrder> {
        let currency = request.currency.to_uppercase();
        let money = |cents: i64| Money {
            currency_code: currency.clone(),
            value: format_cents(cents),
        };

        let body = CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnit {
                custom_id: &request.order_id,
                amount: Amount {
                    currency_code: currency.clone(),
                    value: format_cents(request.total_cents),
                    breakdown: Breakdown {
                        item_total: money(request.total_cents),
                    },
                },
                items: request
                    .line_items
                    .iter()
                    .map(|item| Item {
                        name: &item.name,
                        quantity: item.quantity.to_string(),
                        unit_amount: money(item.unit_price_cents),
                    })
                    .collect(),
            }],
        };

        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_for_status(PROVIDER, response).await);
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse PayPal response: {}", e)))?;

        let approve_url = order
            .links
            .into_iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href);

        Ok(ProviderOrder {
            id: order.id,
            approve_url,
        })
    }

    /// Capture an approved order. An order captured earlier (for example by a
    /// previous attempt whose response was lost) is read back instead.
    pub async fn capture(&self, provider_order_id: &str) -> Result<CaptureResult> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_base,
                urlencoding::encode(provider_order_id)
            ))
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            if body.contains("ORDER_ALREADY_CAPTURED") {
                return self.get_order(&token, provider_order_id).await;
            }
            return Err(AppError::PaymentIncomplete(body));
        }

        if !response.status().is_success() {
            return Err(error_for_status(PROVIDER, response).await);
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse PayPal response: {}", e)))?;

        Ok(order.into_capture_result())
    }

    async fn get_order(&self, token: &str, provider_order_id: &str) -> Result<CaptureResult> {
        let response = self
            .client
            .get(format!(
                "{}/v2/checkout/orders/{}",
                self.api_base,
                urlencoding::encode(provider_order_id)
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_for_status(PROVIDER, response).await);
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse PayPal response: {}", e)))?;

        Ok(order.into_capture_result())
    }

    /// Webhook bodies are signed with HMAC-SHA256 under the shared webhook
    /// secret; the hex digest travels in `Paypal-Transmission-Sig`.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        if self.webhook_secret.is_empty() {
            return Err(AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()));
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        let provided = signature.trim().to_ascii_lowercase();
        if expected.len() != provided.len() {
            return Ok(false);
        }

        Ok(expected.as_bytes().ct_eq(provided.as_bytes()).into())
    }
}

impl CaptureGateway for PayPalClient {
    fn create_order<'a>(&'a self, request: &'a OrderRequest) -> ProviderFuture<'a, ProviderOrder> {
        Box::pin(self.create_checkout_order(request))
    }

    fn capture_order<'a>(&'a self, provider_order_id: &'a str) -> ProviderFuture<'a, CaptureResult> {
        Box::pin(self.capture(provider_order_id))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<bool> {
        self.verify_webhook_signature(payload, signature)
    }
}

/// PayPal webhook envelope; `resource` is interpreted per `event_type`.
#[derive(Debug, Deserialize)]
pub struct PayPalWebhookEvent {
    pub id: String,
    pub event_type: String,
    pub resource: serde_json::Value,
}

/// `PAYMENT.CAPTURE.COMPLETED` resource.
#[derive(Debug, Deserialize)]
pub struct PayPalCaptureResource {
    /// Capture id (the transaction id)
    pub id: String,
    pub status: String,
    pub supplementary_data: Option<PayPalSupplementaryData>,
}

#[derive(Debug, Deserialize)]
pub struct PayPalSupplementaryData {
    pub related_ids: Option<PayPalRelatedIds>,
}

#[derive(Debug, Deserialize)]
pub struct PayPalRelatedIds {
    pub order_id: Option<String>,
}

impl PayPalCaptureResource {
    pub fn order_id(&self) -> Option<&str> {
        self.supplementary_data
            .as_ref()
            .and_then(|d| d.related_ids.as_ref())
            .and_then(|r| r.order_id.as_deref())
    }
}
