use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, types::Value};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    LICENSE_KEY_COLS, PRODUCT_COLS, USER_COLS, query_all, query_one,
};

pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

pub(crate) fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Users ============

/// Insert a user. `email` must already be normalized and `password_hash` a PHC string.
pub fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<User> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, username, email, password_hash, now, now],
    )?;

    Ok(User {
        id,
        username: username.to_string(),
        email: email.to_string(),
        password_hash: password_hash.to_string(),
        is_admin: false,
        two_factor_secret: None,
        two_factor_enabled: false,
        balance_cents: 0,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE username = ?1", USER_COLS),
        &[&username],
    )
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    query_all(
        conn,
        &format!("SELECT {} FROM users ORDER BY created_at DESC, id", USER_COLS),
        &[],
    )
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

pub fn count_admins(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users WHERE is_admin = 1", [], |row| row.get(0))?)
}

pub fn set_user_admin(conn: &Connection, id: &str, is_admin: bool) -> Result<bool> {
    UpdateBuilder::new("users", id)
        .with_updated_at()
        .set("is_admin", is_admin as i32)
        .execute(conn)
}

pub fn update_user_password(conn: &Connection, id: &str, password_hash: &str) -> Result<bool> {
    UpdateBuilder::new("users", id)
        .with_updated_at()
        .set("password_hash", password_hash.to_string())
        .execute(conn)
}

pub fn update_user_email(conn: &Connection, id: &str, email: &str) -> Result<bool> {
    UpdateBuilder::new("users", id)
        .with_updated_at()
        .set("email", email.to_string())
        .execute(conn)
}

/// Store (or clear) the sealed TOTP secret and the enabled flag together.
pub fn set_user_two_factor(
    conn: &Connection,
    id: &str,
    sealed_secret: Option<Vec<u8>>,
    enabled: bool,
) -> Result<bool> {
    UpdateBuilder::new("users", id)
        .with_updated_at()
        .set_nullable("two_factor_secret", sealed_secret)
        .set("two_factor_enabled", enabled as i32)
        .execute(conn)
}

pub fn credit_user_balance(conn: &Connection, id: &str, amount_cents: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE users SET balance_cents = balance_cents + ?1, updated_at = ?2 WHERE id = ?3",
        params![amount_cents, now(), id],
    )?;
    Ok(affected > 0)
}

/// Debit a stored balance. Returns false (and changes nothing) when the balance is short.
pub fn debit_user_balance(conn: &Connection, id: &str, amount_cents: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE users SET balance_cents = balance_cents - ?1, updated_at = ?2
         WHERE id = ?3 AND balance_cents >= ?1",
        params![amount_cents, now(), id],
    )?;
    Ok(affected > 0)
}

/// Read-through projection of the user's most recent license.
///
/// Only keys claimed by the account itself count. A key bound to a guest
/// email never surfaces here, even when an account later takes that email.
pub fn get_current_license(conn: &Connection, user: &User) -> Result<Option<CurrentLicense>> {
    query_one(
        conn,
        "SELECT p.name, k.key
         FROM license_keys k
         JOIN products p ON p.id = k.product_id
         WHERE k.consumed = 1 AND k.assigned_user_id = ?1
         ORDER BY k.consumed_at DESC, k.rowid DESC
         LIMIT 1",
        &[&user.id],
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, name, description, price_cents, stock, needs_license, download_link, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            &input.name,
            &input.description,
            input.price_cents,
            input.stock,
            input.needs_license as i32,
            &input.download_link,
            now,
            now
        ],
    )?;

    Ok(Product {
        id,
        name: input.name.clone(),
        description: input.description.clone(),
        price_cents: input.price_cents,
        stock: input.stock,
        needs_license: input.needs_license,
        download_link: input.download_link.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn get_product_by_name(conn: &Connection, name: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE name = ?1", PRODUCT_COLS),
        &[&name],
    )
}

pub fn list_products(conn: &Connection) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!("SELECT {} FROM products ORDER BY name", PRODUCT_COLS),
        &[],
    )
}

pub fn count_products(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?)
}

pub fn update_product(conn: &Connection, id: &str, input: &UpdateProduct) -> Result<bool> {
    let mut builder = UpdateBuilder::new("products", id)
        .with_updated_at()
        .set_opt("name", input.name.clone())
        .set_opt("price_cents", input.price_cents)
        .set_opt("needs_license", input.needs_license.map(|b| b as i32));
    if let Some(description) = &input.description {
        builder = builder.set_nullable("description", description.clone());
    }
    if let Some(stock) = input.stock {
        builder = builder.set_nullable("stock", stock);
    }
    if let Some(link) = &input.download_link {
        builder = builder.set_nullable("download_link", link.clone());
    }
    builder.execute(conn)
}

pub fn set_product_stock(conn: &Connection, id: &str, stock: Option<i64>) -> Result<bool> {
    UpdateBuilder::new("products", id)
        .with_updated_at()
        .set_nullable("stock", stock)
        .execute(conn)
}

/// Take `quantity` units from a finite stock counter.
///
/// Unlimited and infinite stock always succeed untouched. Finite stock only
/// moves when enough units remain, so the counter can never go negative.
pub fn decrement_stock(conn: &Connection, product_id: &str, quantity: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE products SET stock = stock - ?1, updated_at = ?2
         WHERE id = ?3 AND stock IS NOT NULL AND stock >= 0 AND stock >= ?1",
        params![quantity, now(), product_id],
    )?;
    if affected > 0 {
        return Ok(true);
    }

    // Not finite, or finite but short
    let stock: Option<Option<i64>> = conn
        .query_row(
            "SELECT stock FROM products WHERE id = ?1",
            params![product_id],
            |row| row.get(0),
        )
        .optional()?;

    match stock {
        Some(None) => Ok(true),
        Some(Some(n)) if n < 0 => Ok(true),
        _ => Ok(false),
    }
}

/// Whether any order or purchase references the product.
pub fn product_has_sales(conn: &Connection, product_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM order_items WHERE product_id = ?1)
              + (SELECT COUNT(*) FROM purchases WHERE product_id = ?1)",
        params![product_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Delete a product without sales history. Its unclaimed keys go with it.
pub fn delete_product(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

// ============ License Keys ============

/// Bulk-insert keys for a product as one unit.
///
/// Keys are trimmed and blank lines skipped. A key that already exists (in the
/// pool or earlier in the batch) aborts the whole import. Finite stock grows by
/// the number inserted.
pub fn import_license_keys(conn: &mut Connection, product_id: &str, raw: &str) -> Result<usize> {
    let keys: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();

    if keys.is_empty() {
        return Err(AppError::BadRequest("No license keys provided".into()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if get_product_by_id(&tx, product_id)?.is_none() {
        return Err(AppError::NotFound(crate::error::msg::PRODUCT_NOT_FOUND.into()));
    }

    let mut seen = HashSet::new();
    let now = now();
    {
        let mut exists = tx.prepare("SELECT 1 FROM license_keys WHERE key = ?1")?;
        let mut insert = tx.prepare(
            "INSERT INTO license_keys (id, product_id, key, consumed, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
        )?;
        for key in &keys {
            if !seen.insert(*key) || exists.exists(params![key])? {
                return Err(AppError::Conflict(format!("Duplicate license key: {}", key)));
            }
            insert.execute(params![gen_id(), product_id, key, now])?;
        }
    }

    tx.execute(
        "UPDATE products SET stock = stock + ?1, updated_at = ?2
         WHERE id = ?3 AND stock IS NOT NULL AND stock >= 0",
        params![keys.len() as i64, now, product_id],
    )?;

    tx.commit()?;
    Ok(keys.len())
}

pub fn list_license_keys_for_product(conn: &Connection, product_id: &str) -> Result<Vec<LicenseKey>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_keys WHERE product_id = ?1 ORDER BY created_at, rowid",
            LICENSE_KEY_COLS
        ),
        &[&product_id],
    )
}

pub fn count_free_keys(conn: &Connection, product_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM license_keys WHERE product_id = ?1 AND consumed = 0",
        params![product_id],
        |row| row.get(0),
    )?)
}

// ============ Purchases ============

pub fn create_purchase(
    conn: &Connection,
    id: &str,
    user_id: &str,
    product_id: &str,
    license_key: Option<&str>,
    amount_paid_cents: i64,
) -> Result<Purchase> {
    let now = now();
    conn.execute(
        "INSERT INTO purchases (id, user_id, product_id, license_key, amount_paid_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, user_id, product_id, license_key, amount_paid_cents, now],
    )?;

    Ok(Purchase {
        id: id.to_string(),
        user_id: user_id.to_string(),
        product_id: product_id.to_string(),
        license_key: license_key.map(String::from),
        amount_paid_cents,
        created_at: now,
    })
}

pub fn list_purchases_with_details(conn: &Connection) -> Result<Vec<PurchaseWithDetails>> {
    query_all(
        conn,
        "SELECT pu.id, u.email, p.name, pu.license_key, pu.amount_paid_cents, pu.created_at
         FROM purchases pu
         LEFT JOIN users u ON u.id = pu.user_id
         LEFT JOIN products p ON p.id = pu.product_id
         ORDER BY pu.created_at DESC, pu.rowid DESC",
        &[],
    )
}

// ============ Dashboard ============

#[derive(Debug, serde::Serialize)]
pub struct DashboardStats {
    pub users: i64,
    pub products: i64,
    /// Units sold across fulfilled orders and direct purchases
    pub units_sold: i64,
    pub fulfilled_orders: i64,
    pub free_keys: i64,
}

pub fn dashboard_stats(conn: &Connection) -> Result<DashboardStats> {
    let (units_sold, fulfilled_orders, free_keys) = conn.query_row(
        "SELECT
            (SELECT COALESCE(SUM(oi.quantity), 0) FROM order_items oi
               JOIN orders o ON o.id = oi.order_id WHERE o.status = 'fulfilled')
              + (SELECT COUNT(*) FROM purchases),
            (SELECT COUNT(*) FROM orders WHERE status = 'fulfilled'),
            (SELECT COUNT(*) FROM license_keys WHERE consumed = 0)",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(DashboardStats {
        users: count_users(conn)?,
        products: count_products(conn)?,
        units_sold,
        fulfilled_orders,
        free_keys,
    })
}
