//! Row mapping trait and helpers shared by every query module.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
pub(crate) fn parse_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, username, email, password_hash, is_admin, two_factor_secret, two_factor_enabled, balance_cents, created_at, updated_at";

pub const PRODUCT_COLS: &str =
    "id, name, description, price_cents, stock, needs_license, download_link, created_at, updated_at";

pub const LICENSE_KEY_COLS: &str = "id, product_id, key, consumed, bound_email, assigned_user_id, order_id, purchase_id, consumed_at, created_at";

pub const ORDER_COLS: &str = "id, correlation_id, provider, user_id, buyer_email, total_cents, currency, status, transaction_id, failure_reason, created_at, updated_at, fulfilled_at";

pub const ORDER_ITEM_COLS: &str = "id, order_id, position, product_id, quantity, unit_price_cents";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            is_admin: row.get::<_, i32>(4)? != 0,
            two_factor_secret: row.get(5)?,
            two_factor_enabled: row.get::<_, i32>(6)? != 0,
            balance_cents: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            price_cents: row.get(3)?,
            stock: row.get(4)?,
            needs_license: row.get::<_, i32>(5)? != 0,
            download_link: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl FromRow for LicenseKey {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseKey {
            id: row.get(0)?,
            product_id: row.get(1)?,
            key: row.get(2)?,
            consumed: row.get::<_, i32>(3)? != 0,
            bound_email: row.get(4)?,
            assigned_user_id: row.get(5)?,
            order_id: row.get(6)?,
            purchase_id: row.get(7)?,
            consumed_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            correlation_id: row.get(1)?,
            provider: parse_enum(row, 2, "provider")?,
            user_id: row.get(3)?,
            buyer_email: row.get(4)?,
            total_cents: row.get(5)?,
            currency: row.get(6)?,
            status: parse_enum(row, 7, "status")?,
            transaction_id: row.get(8)?,
            failure_reason: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            fulfilled_at: row.get(12)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            position: row.get(2)?,
            product_id: row.get(3)?,
            quantity: row.get(4)?,
            unit_price_cents: row.get(5)?,
        })
    }
}

impl FromRow for PurchaseWithDetails {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PurchaseWithDetails {
            id: row.get(0)?,
            user_email: row.get(1)?,
            product_name: row.get(2)?,
            license_key: row.get(3)?,
            amount_paid_cents: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for CurrentLicense {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CurrentLicense {
            product_name: row.get(0)?,
            license_key: row.get(1)?,
        })
    }
}
