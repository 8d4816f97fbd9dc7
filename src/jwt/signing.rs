use std::collections::HashSet;

use jwt_simple::prelude::{Claims, Duration, HS256Key, MACLike, VerificationOptions};
use serde::Serialize;

use crate::error::{AppError, Result};

use super::{SessionClaims, TokenKind};

const ISSUER: &str = "keyshop";

/// Lifetime of a 2FA challenge token.
const CHALLENGE_TTL_MINUTES: u64 = 5;

/// Clock skew accepted when checking expiry.
const TIME_TOLERANCE_SECS: u64 = 30;

#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    /// Seconds until expiry
    pub expires_in: u64,
}

/// HS256 signing key for session tokens.
#[derive(Clone)]
pub struct TokenKeys {
    key: HS256Key,
    access_ttl_minutes: u64,
}

impl TokenKeys {
    pub fn new(secret: &[u8], access_ttl_minutes: u64) -> Self {
        Self {
            key: HS256Key::from_bytes(secret),
            access_ttl_minutes,
        }
    }

    fn sign(&self, user_id: &str, kind: TokenKind, ttl_minutes: u64) -> Result<String> {
        let claims = Claims::with_custom_claims(SessionClaims { kind }, Duration::from_mins(ttl_minutes))
            .with_subject(user_id)
            .with_issuer(ISSUER);
        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    pub fn issue_access(&self, user_id: &str) -> Result<IssuedToken> {
        Ok(IssuedToken {
            access_token: self.sign(user_id, TokenKind::Access, self.access_ttl_minutes)?,
            token_type: "bearer",
            expires_in: self.access_ttl_minutes * 60,
        })
    }

    pub fn issue_challenge(&self, user_id: &str) -> Result<String> {
        self.sign(user_id, TokenKind::TwoFactorChallenge, CHALLENGE_TTL_MINUTES)
    }

    /// Verify a token of the expected kind and return its subject (user id).
    /// Every failure is `Unauthorized`.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<String> {
        let options = VerificationOptions {
            allowed_issuers: Some(HashSet::from([ISSUER.to_string()])),
            time_tolerance: Some(Duration::from_secs(TIME_TOLERANCE_SECS)),
            ..Default::default()
        };

        let claims = self
            .key
            .verify_token::<SessionClaims>(token, Some(options))
            .map_err(|e| {
                tracing::debug!("Token verification failed: {}", e);
                AppError::Unauthorized
            })?;

        if claims.custom.kind != expected {
            return Err(AppError::Unauthorized);
        }

        claims.subject.ok_or(AppError::Unauthorized)
    }
}
