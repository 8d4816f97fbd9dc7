use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::payments::PaymentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Fulfilled,
    Failed,
}

impl OrderStatus {
    /// Order lifecycle. `fulfilled` is terminal; a `failed` order re-enters
    /// `paid` only when a confirmation is redelivered.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Failed, Paid) | (Paid, Fulfilled) | (Pending, Failed) | (Paid, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Provider-assigned session/order id; the idempotency key for fulfillment.
    pub correlation_id: String,
    pub provider: PaymentProvider,
    pub user_id: Option<String>,
    pub buyer_email: String,
    pub total_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub fulfilled_at: Option<i64>,
}

/// One cart line frozen at checkout time. The price is a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub position: i64,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: i64,
    /// Price shown to the buyer when the item was added.
    pub unit_price_cents: i64,
}
