use axum::Router;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyshop::auth::{self, password};
use keyshop::captcha::RecaptchaClient;
use keyshop::config::Config;
use keyshop::db::{AppState, create_pool, init_db, queries};
use keyshop::handlers;
use keyshop::jwt::TokenKeys;
use keyshop::models::{CreateProduct, INFINITE_STOCK};
use keyshop::payments::Gateways;

#[derive(Parser, Debug)]
#[command(name = "keyshop")]
#[command(about = "Storefront backend with license-key fulfillment")]
struct Cli {
    /// Seed the database with dev data (admin, licensed product with keys, unlimited product)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data.
/// Only runs in dev mode and when no users exist.
fn seed_dev_data(state: &AppState) -> anyhow::Result<()> {
    let mut conn = state.db.get()?;

    if queries::count_users(&conn)? > 0 {
        tracing::info!("Database already has data, skipping seed");
        return Ok(());
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let admin_password = "Devpass1!";
    let hash = password::hash_password(admin_password)?;
    let admin = queries::create_user(&conn, "admin", "admin@keyshop.local", &hash)?;
    queries::set_user_admin(&conn, &admin.id, true)?;
    queries::credit_user_balance(&conn, &admin.id, 10_000)?;

    let licensed = queries::create_product(
        &conn,
        &CreateProduct {
            name: "Pro License".to_string(),
            description: Some("One seat, lifetime updates".to_string()),
            price_cents: 2000,
            stock: Some(0),
            needs_license: true,
            download_link: Some("https://downloads.keyshop.local/pro".to_string()),
        },
    )?;
    let keys: Vec<String> = (1..=5).map(|i| format!("PRO-DEV-{:04}", i)).collect();
    let inserted = queries::import_license_keys(&mut conn, &licensed.id, &keys.join("\n"))?;

    let unlimited = queries::create_product(
        &conn,
        &CreateProduct {
            name: "Sticker Pack".to_string(),
            description: None,
            price_cents: 500,
            stock: Some(INFINITE_STOCK),
            needs_license: false,
            download_link: None,
        },
    )?;

    tracing::info!("Admin: {} / {}", admin.email, admin_password);
    tracing::info!("Licensed product: {} ({} keys)", licensed.id, inserted);
    tracing::info!("Unlimited product: {}", unlimited.id);

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  admin_email: {}", admin.email);
    println!("  admin_password: {}", admin_password);
    println!("  licensed_product_id: {}", licensed.id);
    println!("  unlimited_product_id: {}", unlimited.id);
    println!("--- END COPY ---");
    println!();
    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.is_empty() {
        if config.dev_mode {
            return CorsLayer::permissive();
        }
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyshop=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path)?;
    {
        let conn = db_pool.get()?;
        init_db(&conn)?;
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        tokens: TokenKeys::new(&config.jwt_secret, config.access_token_ttl_minutes),
        master_key: config.master_key.clone(),
        gateways: Gateways::from_config(&config)?,
        captcha: RecaptchaClient::from_config(&config)?,
        provider_timeout: config.provider_timeout,
        currency: config.currency.clone(),
    };

    if state.gateways.stripe.is_none() {
        tracing::warn!("Stripe is not configured (STRIPE_SECRET_KEY unset)");
    }
    if state.gateways.paypal.is_none() {
        tracing::warn!("PayPal is not configured (PAYPAL_CLIENT_ID/PAYPAL_CLIENT_SECRET unset)");
    }
    if state.captcha.is_none() {
        tracing::warn!("reCAPTCHA is not configured, register and login are unscreened");
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set KEYSHOP_ENV=dev)");
        } else {
            seed_dev_data(&state)?;
        }
    }

    if let Some(ref email) = config.bootstrap_admin_email {
        let conn = state.db.get()?;
        auth::bootstrap_admin(&conn, email)?;
    }

    let app = Router::new()
        .merge(handlers::router(state.clone(), Some(config.rate_limit)))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("keyshop listening on {}", addr);

    // Peer addresses are needed for per-IP rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if cleanup_on_exit {
        let db_path = &config.database_path;
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
