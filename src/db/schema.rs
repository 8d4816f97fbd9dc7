use rusqlite::Connection;

/// Create every table, index and trigger if missing.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (email is stored normalized: NFC, trimmed, lowercase)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            two_factor_secret BLOB,
            two_factor_enabled INTEGER NOT NULL DEFAULT 0,
            balance_cents INTEGER NOT NULL DEFAULT 0 CHECK (balance_cents >= 0),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Catalog. stock: NULL = unlimited, -1 = explicitly infinite, >= 0 = finite
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            stock INTEGER CHECK (stock IS NULL OR stock >= -1),
            needs_license INTEGER NOT NULL DEFAULT 0,
            download_link TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- License pool. order_id/purchase_id are back-references, not foreign keys.
        CREATE TABLE IF NOT EXISTS license_keys (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            key TEXT NOT NULL UNIQUE,
            consumed INTEGER NOT NULL DEFAULT 0,
            bound_email TEXT,
            assigned_user_id TEXT,
            order_id TEXT,
            purchase_id TEXT,
            consumed_at INTEGER,
            created_at INTEGER NOT NULL,

            CHECK (consumed = 0 OR bound_email IS NOT NULL)
        );
        CREATE INDEX IF NOT EXISTS idx_license_keys_free ON license_keys(product_id, consumed);
        CREATE INDEX IF NOT EXISTS idx_license_keys_order ON license_keys(order_id);
        CREATE INDEX IF NOT EXISTS idx_license_keys_user ON license_keys(assigned_user_id);
        CREATE INDEX IF NOT EXISTS idx_license_keys_email ON license_keys(bound_email);

        -- A consumed key is never re-issued or rebound.
        CREATE TRIGGER IF NOT EXISTS license_keys_frozen_after_consume
        BEFORE UPDATE ON license_keys
        WHEN OLD.consumed = 1
        BEGIN
            SELECT RAISE(ABORT, 'license key already consumed');
        END;

        -- Order ledger. correlation_id is the provider's session/order id.
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            correlation_id TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL CHECK (provider IN ('stripe', 'paypal')),
            user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            buyer_email TEXT NOT NULL,
            total_cents INTEGER NOT NULL CHECK (total_cents >= 0),
            currency TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'paid', 'fulfilled', 'failed')),
            transaction_id TEXT,
            failure_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            fulfilled_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);

        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            product_id TEXT NOT NULL REFERENCES products(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            unit_price_cents INTEGER NOT NULL CHECK (unit_price_cents >= 0),

            UNIQUE(order_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_product ON order_items(product_id);

        -- Direct purchases paid from stored balance
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            product_id TEXT NOT NULL REFERENCES products(id),
            license_key TEXT,
            amount_paid_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_user ON purchases(user_id);
        CREATE INDEX IF NOT EXISTS idx_purchases_product ON purchases(product_id);
        "#,
    )
}
