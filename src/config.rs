use std::env;
use std::time::Duration;

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::crypto::{MasterKey, random_bytes};

/// Smallest accepted HS256 secret.
const MIN_JWT_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct RecaptchaConfig {
    pub project_id: String,
    pub site_key: String,
    pub api_key: String,
    pub api_base: String,
    pub min_score: f32,
}

/// Per-IP request budgets for the public surface.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Login, registration, 2FA verification and checkout creation
    pub strict_rpm: u32,
    /// Capture and confirmation
    pub standard_rpm: u32,
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub jwt_secret: Vec<u8>,
    pub master_key: MasterKey,
    pub access_token_ttl_minutes: u64,
    pub stripe: Option<StripeConfig>,
    pub paypal: Option<PayPalConfig>,
    pub recaptcha: Option<RecaptchaConfig>,
    pub provider_timeout: Duration,
    pub currency: String,
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub bootstrap_admin_email: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("KEYSHOP_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(encoded) => {
                let secret = BASE64
                    .decode(encoded.trim())
                    .context("JWT_SECRET must be base64")?;
                if secret.len() < MIN_JWT_SECRET_BYTES {
                    bail!("JWT_SECRET must decode to at least {} bytes", MIN_JWT_SECRET_BYTES);
                }
                secret
            }
            Err(_) if dev_mode => {
                tracing::warn!("JWT_SECRET not set, using an ephemeral secret (dev mode)");
                random_bytes::<MIN_JWT_SECRET_BYTES>().to_vec()
            }
            Err(_) => bail!("JWT_SECRET is required outside dev mode"),
        };

        let master_key = load_master_key(dev_mode)?;

        let stripe = env::var("STRIPE_SECRET_KEY").ok().map(|secret_key| StripeConfig {
            secret_key,
            webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
        });

        let paypal = match (env::var("PAYPAL_CLIENT_ID"), env::var("PAYPAL_CLIENT_SECRET")) {
            (Ok(client_id), Ok(client_secret)) => Some(PayPalConfig {
                client_id,
                client_secret,
                webhook_secret: env::var("PAYPAL_WEBHOOK_SECRET").unwrap_or_default(),
                api_base: env::var("PAYPAL_API_BASE")
                    .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
            }),
            _ => None,
        };

        let recaptcha = match (
            env::var("RECAPTCHA_PROJECT_ID"),
            env::var("RECAPTCHA_SITE_KEY"),
            env::var("RECAPTCHA_API_KEY"),
        ) {
            (Ok(project_id), Ok(site_key), Ok(api_key)) => Some(RecaptchaConfig {
                project_id,
                site_key,
                api_key,
                api_base: env::var("RECAPTCHA_API_BASE")
                    .unwrap_or_else(|_| "https://recaptchaenterprise.googleapis.com".to_string()),
                min_score: env::var("RECAPTCHA_MIN_SCORE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|v: &f32| (0.0..=1.0).contains(v))
                    .unwrap_or(0.5),
            }),
            _ => None,
        };

        let provider_timeout_secs: u64 = env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(10);

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let rate_limit = RateLimitConfig {
            strict_rpm: parse_rpm("RATE_LIMIT_STRICT_RPM", 10),
            standard_rpm: parse_rpm("RATE_LIMIT_STANDARD_RPM", 30),
        };

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "keyshop.db".to_string()),
            base_url,
            dev_mode,
            jwt_secret,
            master_key,
            access_token_ttl_minutes: env::var("ACCESS_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            stripe,
            paypal,
            recaptcha,
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            currency: env::var("CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|_| "USD".to_string()),
            cors_origins,
            rate_limit,
            bootstrap_admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL").ok(),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_master_key(dev_mode: bool) -> anyhow::Result<MasterKey> {
    let encoded = match (env::var("MASTER_KEY"), env::var("MASTER_KEY_FILE")) {
        (Ok(key), _) => key,
        (Err(_), Ok(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read MASTER_KEY_FILE {}", path))?,
        _ if dev_mode => {
            tracing::warn!("MASTER_KEY not set, using an ephemeral key (dev mode)");
            MasterKey::generate()
        }
        _ => bail!("MASTER_KEY or MASTER_KEY_FILE is required outside dev mode"),
    };

    MasterKey::from_base64(&encoded).map_err(|e| anyhow::anyhow!("{}", e))
}

fn parse_rpm(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
