use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::jwt::TokenKind;
use crate::models::User;
use crate::util::extract_bearer_token;

/// The authenticated user, inserted into request extensions by [`user_auth`].
#[derive(Clone)]
pub struct UserContext {
    pub user: User,
}

/// Resolve a bearer access token to its user.
/// A valid token for a deleted account is `Unauthorized`.
pub fn authenticate_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = extract_bearer_token(headers).ok_or(AppError::Unauthorized)?;
    let user_id = state.tokens.verify(&token, TokenKind::Access)?;

    let conn = state.db.get()?;
    queries::get_user_by_id(&conn, &user_id)?.ok_or(AppError::Unauthorized)
}

/// Like [`authenticate_user`], but a missing Authorization header means an
/// anonymous caller. A present but invalid token is still rejected.
pub fn optional_user(state: &AppState, headers: &HeaderMap) -> Result<Option<User>> {
    if headers.get("Authorization").is_none() {
        return Ok(None);
    }
    authenticate_user(state, headers).map(Some)
}

pub async fn user_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate_user(&state, request.headers())?;
    request.extensions_mut().insert(UserContext { user });
    Ok(next.run(request).await)
}
