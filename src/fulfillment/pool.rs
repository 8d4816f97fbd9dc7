use rusqlite::Connection;

use crate::db::from_row::{LICENSE_KEY_COLS, query_one};
use crate::db::queries::now;
use crate::error::{AppError, Result};
use crate::models::LicenseKey;

/// Who a claimed key is bound to, and which order or purchase claimed it.
#[derive(Debug, Clone, Copy)]
pub struct Claimant<'a> {
    pub email: &'a str,
    pub user_id: Option<&'a str>,
    pub order_id: Option<&'a str>,
    pub purchase_id: Option<&'a str>,
}

#[derive(Debug)]
pub enum KeyClaim {
    Claimed(LicenseKey),
    Exhausted,
}

impl KeyClaim {
    pub fn into_result(self, product_id: &str) -> Result<LicenseKey> {
        match self {
            KeyClaim::Claimed(key) => Ok(key),
            KeyClaim::Exhausted => Err(AppError::LicenseExhausted(product_id.to_string())),
        }
    }
}

/// Claim one free key for `product_id` and bind it to `claimant`.
///
/// Selection and consumption happen in a single conditional UPDATE, so two
/// callers can never receive the same key. Runs inside the caller's
/// transaction when given one; on its own it is atomic as a single statement.
pub fn claim_one(conn: &Connection, product_id: &str, claimant: &Claimant) -> Result<KeyClaim> {
    let claimed: Option<LicenseKey> = query_one(
        conn,
        &format!(
            "UPDATE license_keys
             SET consumed = 1, bound_email = ?1, assigned_user_id = ?2, order_id = ?3,
                 purchase_id = ?4, consumed_at = ?5
             WHERE id = (
                 SELECT id FROM license_keys
                 WHERE product_id = ?6 AND consumed = 0
                 ORDER BY created_at, rowid
                 LIMIT 1
             ) AND consumed = 0
             RETURNING {}",
            LICENSE_KEY_COLS
        ),
        &[
            &claimant.email,
            &claimant.user_id,
            &claimant.order_id,
            &claimant.purchase_id,
            &now(),
            &product_id,
        ],
    )?;

    Ok(match claimed {
        Some(key) => {
            tracing::debug!(product_id, key_id = %key.id, "Claimed license key");
            KeyClaim::Claimed(key)
        }
        None => KeyClaim::Exhausted,
    })
}
