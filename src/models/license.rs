use serde::{Deserialize, Serialize};

/// A key in a product's license pool.
///
/// Once `consumed` is set the row is frozen: `bound_email` is non-null and a
/// trigger rejects any further update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseKey {
    pub id: String,
    pub product_id: String,
    pub key: String,
    pub consumed: bool,
    pub bound_email: Option<String>,
    pub assigned_user_id: Option<String>,
    pub order_id: Option<String>,
    pub purchase_id: Option<String>,
    pub consumed_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct ImportKeys {
    /// One key per line; blank lines are ignored.
    pub keys: String,
}

#[derive(Debug, Serialize)]
pub struct ImportKeysResult {
    pub inserted: usize,
}
