//! keyshop - storefront backend for license-keyed digital products
//!
//! Checkout through Stripe or PayPal, a license-key pool per product, and an
//! idempotent fulfillment engine that assigns keys exactly once per paid order.

pub mod auth;
pub mod captcha;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod rate_limit;
pub mod util;
