use serde::{Deserialize, Serialize};

/// A completed direct purchase paid from the buyer's stored balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub license_key: Option<String>,
    pub amount_paid_cents: i64,
    pub created_at: i64,
}

#[derive(Debug, Serialize)]
pub struct PurchaseWithDetails {
    pub id: String,
    pub user_email: Option<String>,
    pub product_name: Option<String>,
    pub license_key: Option<String>,
    pub amount_paid_cents: i64,
    pub created_at: i64,
}
