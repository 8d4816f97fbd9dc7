use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    /// AES-GCM sealed TOTP secret (see `MasterKey::encrypt_secret`)
    #[serde(skip_serializing)]
    pub two_factor_secret: Option<Vec<u8>>,
    pub two_factor_enabled: bool,
    pub balance_cents: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub recaptcha_token: Option<String>,
}

/// Most recent license bound to a user, computed from the license pool.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentLicense {
    pub product_name: String,
    pub license_key: String,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub two_factor_enabled: bool,
    pub balance_cents: i64,
    pub current_package: Option<String>,
    pub current_license_key: Option<String>,
    pub created_at: i64,
}

impl UserProfile {
    pub fn new(user: User, current: Option<CurrentLicense>) -> Self {
        let (current_package, current_license_key) = match current {
            Some(c) => (Some(c.product_name), Some(c.license_key)),
            None => (None, None),
        };
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_admin: user.is_admin,
            two_factor_enabled: user.two_factor_enabled,
            balance_cents: user.balance_cents,
            current_package,
            current_license_key,
            created_at: user.created_at,
        }
    }
}
