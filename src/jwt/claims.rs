use serde::{Deserialize, Serialize};

/// What a token may be used for. A challenge token only completes a 2FA login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "access")]
    Access,
    #[serde(rename = "2fa_challenge")]
    TwoFactorChallenge,
}

/// Custom claims; subject (user id), issuer and expiry are standard claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub kind: TokenKind,
}
