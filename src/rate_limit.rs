//! Per-IP rate limiting for the public surface.
//!
//! Tiers:
//! - Strict: login, registration, 2FA verification, checkout creation
//! - Standard: Stripe confirmation, PayPal capture
//!
//! Configure via RATE_LIMIT_STRICT_RPM (default 10) and
//! RATE_LIMIT_STANDARD_RPM (default 30).

use std::sync::Arc;
use std::time::Duration;

use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;

pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Replenish one request every `60 / rpm` seconds, with a burst of `rpm`.
fn create_layer(requests_per_minute: u32) -> RateLimitLayer {
    let requests_per_minute = requests_per_minute.max(1);
    let period_secs = 60 / requests_per_minute as u64;
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_secs(period_secs.max(1)))
        .burst_size(requests_per_minute)
        .finish()
        .expect("period and burst size are non-zero");

    GovernorLayer::new(Arc::new(config))
}

pub fn strict_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}

pub fn standard_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}
