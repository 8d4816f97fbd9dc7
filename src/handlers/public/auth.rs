use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use crate::auth::{password, totp};
use crate::captcha;
use crate::crypto::normalize_email;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::Json;
use crate::jwt::{IssuedToken, TokenKind};
use crate::middleware::UserContext;
use crate::models::{CreateUser, User, UserProfile};

const TOTP_ISSUER: &str = "keyshop";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub recaptcha_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    Token(IssuedToken),
    TwoFactorRequired {
        two_factor_required: bool,
        challenge_token: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct VerifyTwoFactorRequest {
    pub challenge_token: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct TwoFactorSetupResponse {
    pub secret: String,
    pub otpauth_uri: String,
}

#[derive(Debug, Serialize)]
pub struct TwoFactorStatusResponse {
    pub two_factor_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeEmailRequest {
    pub new_email: String,
    pub password: String,
}

fn profile_for(state: &AppState, user: User) -> Result<UserProfile> {
    let conn = state.db.get()?;
    let current = queries::get_current_license(&conn, &user)?;
    Ok(UserProfile::new(user, current))
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Check a TOTP code against the user's sealed secret.
fn check_totp(state: &AppState, user: &User, code: &str) -> Result<()> {
    let sealed = user
        .two_factor_secret
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Two-factor authentication is not set up".into()))?;
    let secret = state.master_key.decrypt_secret(&user.id, sealed)?;
    if totp::verify(&secret, code, unix_now()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> Result<Json<UserProfile>> {
    captcha::check(&state, input.recaptcha_token.as_deref(), captcha::ACTION_REGISTER).await?;

    let username = input.username.trim();
    let email = normalize_email(&input.email);
    password::validate_username(username)?;
    password::validate_email(&email)?;
    password::validate_password(&input.password)?;

    let conn = state.db.get()?;
    if queries::get_user_by_email(&conn, &email)?.is_some() {
        return Err(AppError::Conflict(msg::EMAIL_TAKEN.into()));
    }
    if queries::get_user_by_username(&conn, username)?.is_some() {
        return Err(AppError::Conflict(msg::USERNAME_TAKEN.into()));
    }

    let hash = password::hash_password(&input.password)?;
    let user = queries::create_user(&conn, username, &email, &hash)?;
    tracing::info!(user_id = %user.id, "Registered user");
    drop(conn);

    Ok(Json(profile_for(&state, user)?))
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    captcha::check(&state, input.recaptcha_token.as_deref(), captcha::ACTION_LOGIN).await?;

    let email = normalize_email(&input.email);
    let conn = state.db.get()?;

    let user = match queries::get_user_by_email(&conn, &email)? {
        Some(u) if password::verify_password(&input.password, &u.password_hash) => u,
        _ => {
            tracing::debug!("Rejected login");
            return Err(AppError::Unauthorized);
        }
    };

    if user.two_factor_enabled {
        return Ok(Json(LoginResponse::TwoFactorRequired {
            two_factor_required: true,
            challenge_token: state.tokens.issue_challenge(&user.id)?,
        }));
    }

    Ok(Json(LoginResponse::Token(state.tokens.issue_access(&user.id)?)))
}

pub async fn verify_two_factor(
    State(state): State<AppState>,
    Json(input): Json<VerifyTwoFactorRequest>,
) -> Result<Json<IssuedToken>> {
    let user_id = state
        .tokens
        .verify(&input.challenge_token, TokenKind::TwoFactorChallenge)?;
    let user = {
        let conn = state.db.get()?;
        queries::get_user_by_id(&conn, &user_id)?.ok_or(AppError::Unauthorized)?
    };
    if !user.two_factor_enabled {
        return Err(AppError::Unauthorized);
    }

    check_totp(&state, &user, &input.code)?;
    Ok(Json(state.tokens.issue_access(&user.id)?))
}

pub async fn setup_two_factor(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<TwoFactorSetupResponse>> {
    if ctx.user.two_factor_enabled {
        return Err(AppError::Conflict(
            "Two-factor authentication is already enabled".into(),
        ));
    }

    let secret = totp::generate_secret();
    let sealed = state.master_key.encrypt_secret(&ctx.user.id, &secret)?;
    let conn = state.db.get()?;
    queries::set_user_two_factor(&conn, &ctx.user.id, Some(sealed), false)?;

    Ok(Json(TwoFactorSetupResponse {
        secret: totp::base32_encode(&secret),
        otpauth_uri: totp::otpauth_uri(&secret, &ctx.user.email, TOTP_ISSUER),
    }))
}

pub async fn enable_two_factor(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(input): Json<TwoFactorCodeRequest>,
) -> Result<Json<TwoFactorStatusResponse>> {
    if ctx.user.two_factor_enabled {
        return Err(AppError::Conflict(
            "Two-factor authentication is already enabled".into(),
        ));
    }
    check_totp(&state, &ctx.user, &input.code)
        .map_err(|_| AppError::BadRequest(msg::INVALID_TWO_FACTOR_CODE.into()))?;

    let conn = state.db.get()?;
    queries::set_user_two_factor(&conn, &ctx.user.id, ctx.user.two_factor_secret.clone(), true)?;
    tracing::info!(user_id = %ctx.user.id, "Two-factor authentication enabled");

    Ok(Json(TwoFactorStatusResponse {
        two_factor_enabled: true,
    }))
}

pub async fn disable_two_factor(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(input): Json<TwoFactorCodeRequest>,
) -> Result<Json<TwoFactorStatusResponse>> {
    if !ctx.user.two_factor_enabled {
        return Err(AppError::BadRequest(
            "Two-factor authentication is not enabled".into(),
        ));
    }
    check_totp(&state, &ctx.user, &input.code)
        .map_err(|_| AppError::BadRequest(msg::INVALID_TWO_FACTOR_CODE.into()))?;

    let conn = state.db.get()?;
    queries::set_user_two_factor(&conn, &ctx.user.id, None, false)?;
    tracing::info!(user_id = %ctx.user.id, "Two-factor authentication disabled");

    Ok(Json(TwoFactorStatusResponse {
        two_factor_enabled: false,
    }))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<UserProfile>> {
    Ok(Json(profile_for(&state, ctx.user)?))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(input): Json<ChangePasswordRequest>,
) -> Result<Json<UserProfile>> {
    if !password::verify_password(&input.current_password, &ctx.user.password_hash) {
        return Err(AppError::Unauthorized);
    }
    password::validate_password(&input.new_password)?;

    let hash = password::hash_password(&input.new_password)?;
    {
        let conn = state.db.get()?;
        queries::update_user_password(&conn, &ctx.user.id, &hash)?;
    }
    tracing::info!(user_id = %ctx.user.id, "Password changed");

    Ok(Json(profile_for(&state, ctx.user)?))
}

pub async fn change_email(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(input): Json<ChangeEmailRequest>,
) -> Result<Json<UserProfile>> {
    if !password::verify_password(&input.password, &ctx.user.password_hash) {
        return Err(AppError::Unauthorized);
    }
    let email = normalize_email(&input.new_email);
    password::validate_email(&email)?;

    let user = {
        let conn = state.db.get()?;
        match queries::get_user_by_email(&conn, &email)? {
            Some(existing) if existing.id != ctx.user.id => {
                return Err(AppError::Conflict(msg::EMAIL_TAKEN.into()));
            }
            _ => {}
        }
        queries::update_user_email(&conn, &ctx.user.id, &email)?;
        queries::get_user_by_id(&conn, &ctx.user.id)?
            .ok_or_else(|| AppError::NotFound(msg::USER_NOT_FOUND.into()))?
    };

    Ok(Json(profile_for(&state, user)?))
}
