//! Test utilities and fixtures for keyshop integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use hmac::{Hmac, Mac};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use sha2::Sha256;

pub use keyshop::auth::{self, Capability, authorize, totp};
pub use keyshop::captcha::{self, Assessment, CaptchaVerifier};
pub use keyshop::config::{PayPalConfig, StripeConfig};
pub use keyshop::crypto::MasterKey;
pub use keyshop::db::{AppState, configure_connection, init_db, queries};
pub use keyshop::error::{AppError, msg};
pub use keyshop::fulfillment::{
    self, AssignedLicense, ConfirmationSource, FulfillmentResult, PaymentConfirmation,
    checkout::Buyer, fulfill_order, ledger, pool,
};
pub use keyshop::handlers;
pub use keyshop::jwt::TokenKeys;
pub use keyshop::models::*;
pub use keyshop::payments::{
    CaptureGateway, CaptureResult, CheckoutSession, Gateways, OrderRequest, PayPalClient,
    PaymentProvider, ProviderFuture, ProviderOrder, SessionGateway, SessionRequest, SessionStatus,
    StripeClient,
};

pub const TEST_PASSWORD: &str = "Sup3r-secret";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const PAYPAL_WEBHOOK_SECRET: &str = "paypal_test_secret";
pub const TEST_BASE_URL: &str = "http://localhost:3000";

type HmacSha256 = Hmac<Sha256>;

/// Create a test master key (deterministic for testing)
pub fn test_master_key() -> MasterKey {
    MasterKey::from_bytes([0u8; 32])
}

pub fn test_token_keys() -> TokenKeys {
    TokenKeys::new(&[7u8; 32], 60)
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("Failed to enable foreign keys");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============ Fixtures ============

/// Create a user whose password is not usable for login (hashing is slow in debug builds).
pub fn create_test_user(conn: &Connection, username: &str, email: &str) -> User {
    queries::create_user(conn, username, email, "not-a-phc-hash").expect("Failed to create test user")
}

/// Create a user that can log in with [`TEST_PASSWORD`].
pub fn create_test_user_with_password(conn: &Connection, username: &str, email: &str) -> User {
    let hash = auth::password::hash_password(TEST_PASSWORD).expect("Failed to hash password");
    queries::create_user(conn, username, email, &hash).expect("Failed to create test user")
}

/// Create an admin, optionally with 2FA enabled. Returns the user and its TOTP secret.
pub fn create_test_admin(
    conn: &Connection,
    username: &str,
    email: &str,
    with_two_factor: bool,
) -> (User, Option<Vec<u8>>) {
    let user = create_test_user(conn, username, email);
    queries::set_user_admin(conn, &user.id, true).expect("Failed to promote admin");

    let secret = if with_two_factor {
        let secret = totp::generate_secret().to_vec();
        let sealed = test_master_key()
            .encrypt_secret(&user.id, &secret)
            .expect("Failed to seal secret");
        queries::set_user_two_factor(conn, &user.id, Some(sealed), true)
            .expect("Failed to enable 2FA");
        Some(secret)
    } else {
        None
    };

    let user = queries::get_user_by_id(conn, &user.id)
        .expect("Failed to reload admin")
        .expect("Admin should exist");
    (user, secret)
}

pub fn create_test_product(
    conn: &Connection,
    name: &str,
    price_cents: i64,
    stock: Option<i64>,
    needs_license: bool,
) -> Product {
    let input = CreateProduct {
        name: name.to_string(),
        description: None,
        price_cents,
        stock,
        needs_license,
        download_link: Some(format!("https://downloads.test/{}", name.to_lowercase())),
    };
    queries::create_product(conn, &input).expect("Failed to create test product")
}

/// A licensed product with `keys` imported and finite stock equal to the key count.
pub fn create_licensed_product(conn: &mut Connection, name: &str, keys: &[&str]) -> Product {
    let product = create_test_product(conn, name, 1500, Some(0), true);
    if !keys.is_empty() {
        queries::import_license_keys(conn, &product.id, &keys.join("\n"))
            .expect("Failed to import keys");
    }
    queries::get_product_by_id(conn, &product.id)
        .expect("Failed to reload product")
        .expect("Product should exist")
}

pub fn cart_line(product: &Product, quantity: i64) -> CartItem {
    CartItem {
        product_id: product.id.clone(),
        quantity,
        unit_price_cents: product.price_cents,
    }
}

/// Persist a pending order directly, bypassing the provider.
pub fn create_test_order(
    conn: &mut Connection,
    correlation_id: &str,
    buyer_email: &str,
    user_id: Option<&str>,
    items: &[CartItem],
) -> Order {
    let id = uuid::Uuid::new_v4().to_string();
    ledger::create_pending_order(
        conn,
        &ledger::NewOrder {
            id: &id,
            correlation_id,
            provider: PaymentProvider::Stripe,
            user_id,
            buyer_email,
            currency: "USD",
            items,
        },
    )
    .expect("Failed to create test order")
}

pub fn confirmation(correlation_id: &str, transaction_id: &str) -> PaymentConfirmation {
    PaymentConfirmation {
        correlation_id: correlation_id.to_string(),
        transaction_id: Some(transaction_id.to_string()),
        source: ConfirmationSource::Webhook,
    }
}

pub fn product_stock(conn: &Connection, product_id: &str) -> Option<i64> {
    queries::get_product_by_id(conn, product_id)
        .expect("query failed")
        .expect("product should exist")
        .stock
}

pub fn consumed_key_count(conn: &Connection, product_id: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM license_keys WHERE product_id = ?1 AND consumed = 1",
        [product_id],
        |row| row.get(0),
    )
    .expect("count failed")
}

// ============ Fake payment providers ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    Ok,
    /// Every call fails with `ProviderUnavailable`
    Fail,
    /// Every call never completes
    Hang,
}

async fn apply_mode(mode: FakeMode) -> keyshop::error::Result<()> {
    match mode {
        FakeMode::Ok => Ok(()),
        FakeMode::Fail => Err(AppError::ProviderUnavailable("fake outage".into())),
        FakeMode::Hang => {
            std::future::pending::<()>().await;
            Ok(())
        }
    }
}

/// In-memory stand-in for Stripe Checkout. Webhook verification uses the
/// real client so signatures are checked exactly as in production.
pub struct FakeStripe {
    mode: Mutex<FakeMode>,
    verifier: StripeClient,
    pub sessions_created: AtomicUsize,
    pub retrieve_calls: AtomicUsize,
    /// session id -> payment intent, once paid
    sessions: Mutex<HashMap<String, Option<String>>>,
    pub last_request: Mutex<Option<SessionRequest>>,
}

impl FakeStripe {
    pub fn new() -> Arc<Self> {
        let config = StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: STRIPE_WEBHOOK_SECRET.to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
        };
        Arc::new(Self {
            mode: Mutex::new(FakeMode::Ok),
            verifier: StripeClient::new(&config, Duration::from_secs(1)).unwrap(),
            sessions_created: AtomicUsize::new(0),
            retrieve_calls: AtomicUsize::new(0),
            sessions: Mutex::new(HashMap::new()),
            last_request: Mutex::new(None),
        })
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn mode(&self) -> FakeMode {
        *self.mode.lock().unwrap()
    }

    /// Simulate the buyer completing payment.
    pub fn mark_paid(&self, session_id: &str, payment_intent: &str) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), Some(payment_intent.to_string()));
    }
}

impl SessionGateway for FakeStripe {
    fn create_session<'a>(&'a self, request: &'a SessionRequest) -> ProviderFuture<'a, CheckoutSession> {
        Box::pin(async move {
            apply_mode(self.mode()).await?;
            let n = self.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("cs_test_{}", n);
            self.sessions.lock().unwrap().insert(id.clone(), None);
            *self.last_request.lock().unwrap() = Some(request.clone());
            Ok(CheckoutSession {
                url: format!("https://checkout.stripe.test/{}", id),
                id,
            })
        })
    }

    fn retrieve_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, SessionStatus> {
        Box::pin(async move {
            self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
            apply_mode(self.mode()).await?;
            let payment_intent = self
                .sessions
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .ok_or_else(|| AppError::Internal(format!("unknown session {}", session_id)))?;
            Ok(SessionStatus {
                id: session_id.to_string(),
                paid: payment_intent.is_some(),
                payment_status: if payment_intent.is_some() { "paid" } else { "unpaid" }.to_string(),
                transaction_id: payment_intent,
            })
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> keyshop::error::Result<bool> {
        self.verifier.verify_webhook_signature(payload, signature)
    }
}

/// In-memory stand-in for PayPal orders and captures.
pub struct FakePayPal {
    mode: Mutex<FakeMode>,
    verifier: PayPalClient,
    pub orders_created: AtomicUsize,
    pub capture_calls: AtomicUsize,
    capture_status: Mutex<String>,
}

impl FakePayPal {
    pub fn new() -> Arc<Self> {
        let config = PayPalConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            webhook_secret: PAYPAL_WEBHOOK_SECRET.to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
        };
        Arc::new(Self {
            mode: Mutex::new(FakeMode::Ok),
            verifier: PayPalClient::new(&config, Duration::from_secs(1)).unwrap(),
            orders_created: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            capture_status: Mutex::new("COMPLETED".to_string()),
        })
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_capture_status(&self, status: &str) {
        *self.capture_status.lock().unwrap() = status.to_string();
    }

    fn mode(&self) -> FakeMode {
        *self.mode.lock().unwrap()
    }
}

impl CaptureGateway for FakePayPal {
    fn create_order<'a>(&'a self, _request: &'a OrderRequest) -> ProviderFuture<'a, ProviderOrder> {
        Box::pin(async move {
            apply_mode(self.mode()).await?;
            let n = self.orders_created.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("PAYPAL-ORDER-{}", n);
            Ok(ProviderOrder {
                approve_url: Some(format!("https://paypal.test/approve/{}", id)),
                id,
            })
        })
    }

    fn capture_order<'a>(&'a self, provider_order_id: &'a str) -> ProviderFuture<'a, CaptureResult> {
        Box::pin(async move {
            self.capture_calls.fetch_add(1, Ordering::SeqCst);
            apply_mode(self.mode()).await?;
            let status = self.capture_status.lock().unwrap().clone();
            Ok(CaptureResult {
                transaction_id: Some(format!("CAPTURE-{}", provider_order_id)),
                status,
            })
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> keyshop::error::Result<bool> {
        self.verifier.verify_webhook_signature(payload, signature)
    }
}

// ============ App state ============

fn build_state(pool: r2d2::Pool<SqliteConnectionManager>) -> AppState {
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        base_url: TEST_BASE_URL.to_string(),
        tokens: test_token_keys(),
        master_key: test_master_key(),
        gateways: Gateways::default(),
        captcha: None,
        provider_timeout: Duration::from_millis(200),
        currency: "USD".to_string(),
    }
}

/// Create an AppState for testing with an in-memory database.
///
/// Every pooled connection opens the same named shared-cache database, so a
/// handler sees the fixtures written through any other connection.
pub fn create_test_app_state() -> AppState {
    let uri = format!("file:keyshop-{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
    let manager = SqliteConnectionManager::file(uri).with_init(configure_connection);
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    build_state(pool)
}

/// File-backed state for tests that race real threads against the database.
/// Keep the returned directory alive for the duration of the test.
pub fn create_file_backed_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("keyshop-test.db");
    let manager = SqliteConnectionManager::file(&path).with_init(configure_connection);
    let pool = Pool::builder().max_size(16).build(manager).unwrap();
    (build_state(pool), dir)
}

/// Attach fakes for both providers and hand them back for inspection.
pub fn with_fake_gateways(state: &mut AppState) -> (Arc<FakeStripe>, Arc<FakePayPal>) {
    let stripe = FakeStripe::new();
    let paypal = FakePayPal::new();
    state.gateways = Gateways {
        stripe: Some(stripe.clone() as Arc<dyn SessionGateway>),
        paypal: Some(paypal.clone() as Arc<dyn CaptureGateway>),
    };
    (stripe, paypal)
}

/// Token-to-verdict table standing in for reCAPTCHA Enterprise.
/// Unknown tokens assess as invalid.
pub struct FakeCaptcha {
    mode: Mutex<FakeMode>,
    /// token -> (action, score)
    tokens: Mutex<HashMap<String, (String, f32)>>,
    pub assessments: AtomicUsize,
}

impl FakeCaptcha {
    pub const MIN_SCORE: f32 = 0.5;

    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(FakeMode::Ok),
            tokens: Mutex::new(HashMap::new()),
            assessments: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Register a token the browser would have obtained for `action`.
    pub fn issue(&self, token: &str, action: &str, score: f32) {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), (action.to_string(), score));
    }
}

impl CaptchaVerifier for FakeCaptcha {
    fn assess<'a>(&'a self, token: &'a str, _expected_action: &'a str) -> ProviderFuture<'a, Assessment> {
        Box::pin(async move {
            self.assessments.fetch_add(1, Ordering::SeqCst);
            let mode = *self.mode.lock().unwrap();
            apply_mode(mode).await?;
            let verdict = self.tokens.lock().unwrap().get(token).cloned();
            Ok(match verdict {
                Some((action, score)) => Assessment {
                    valid: true,
                    invalid_reason: None,
                    action: Some(action),
                    score,
                },
                None => Assessment {
                    valid: false,
                    invalid_reason: Some("MALFORMED".to_string()),
                    action: None,
                    score: 0.0,
                },
            })
        })
    }

    fn min_score(&self) -> f32 {
        Self::MIN_SCORE
    }
}

/// Turn on bot screening with a fake verifier and hand it back.
pub fn with_fake_captcha(state: &mut AppState) -> Arc<FakeCaptcha> {
    let fake = FakeCaptcha::new();
    state.captcha = Some(fake.clone() as Arc<dyn CaptchaVerifier>);
    fake
}

/// Full router without rate limiting (no peer address under `oneshot`)
pub fn app(state: AppState) -> Router {
    handlers::router(state.clone(), None).with_state(state)
}

pub fn bearer(state: &AppState, user_id: &str) -> String {
    let token = state.tokens.issue_access(user_id).expect("Failed to issue token");
    format!("Bearer {}", token.access_token)
}

// ============ Requests and responses ============

pub fn json_request(method: &str, uri: &str, auth: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8_lossy(&bytes).to_string()
}

// ============ Webhook signing ============

pub fn stripe_signature_header(payload: &[u8], secret: &str) -> String {
    let timestamp = now().to_string();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

pub fn paypal_signature(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn stripe_session_event(event_type: &str, session_id: &str, payment_status: &str, payment_intent: Option<&str>) -> Vec<u8> {
    serde_json::json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4()),
        "type": event_type,
        "data": {
            "object": {
                "id": session_id,
                "payment_status": payment_status,
                "payment_intent": payment_intent,
                "customer_email": "buyer@example.com",
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn paypal_capture_event(event_type: &str, capture_id: &str, order_id: &str) -> Vec<u8> {
    serde_json::json!({
        "id": format!("WH-{}", uuid::Uuid::new_v4()),
        "event_type": event_type,
        "resource": {
            "id": capture_id,
            "status": "COMPLETED",
            "supplementary_data": { "related_ids": { "order_id": order_id } }
        }
    })
    .to_string()
    .into_bytes()
}
