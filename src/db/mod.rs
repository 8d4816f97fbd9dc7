pub mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::captcha::CaptchaVerifier;
use crate::crypto::MasterKey;
use crate::jwt::TokenKeys;
use crate::payments::Gateways;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Base URL for provider redirects (e.g., https://shop.example.com)
    pub base_url: String,
    pub tokens: TokenKeys,
    /// Seals TOTP secrets at rest
    pub master_key: MasterKey,
    /// Payment providers, injected so tests can substitute fakes
    pub gateways: Gateways,
    /// Bot screening on register and login; `None` disables it
    pub captcha: Option<Arc<dyn CaptchaVerifier>>,
    /// Upper bound on any single call to a payment provider
    pub provider_timeout: Duration,
    pub currency: String,
}

/// Pragmas applied to every pooled connection.
///
/// WAL lets readers proceed while a fulfillment holds the write lock, and the
/// busy timeout makes concurrent `BEGIN IMMEDIATE` callers queue instead of
/// failing with SQLITE_BUSY.
pub fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;
         PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;",
    )
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    Pool::builder().max_size(10).build(manager)
}
