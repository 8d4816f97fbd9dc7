use chrono::{TimeZone, Utc};
use rusqlite::Connection;

use crate::crypto::normalize_email;
use crate::db::queries;
use crate::error::Result;
use crate::models::User;

#[derive(Debug)]
pub enum BootstrapOutcome {
    Promoted(User),
    AlreadyAdmin,
    /// Another account already holds admin; nothing was changed.
    AdminExists,
    NoAccount,
}

/// Promote the account registered under `email`, but only while the store
/// has no admin at all. Registration never proves email ownership, so once
/// an admin exists a later account claiming the address gains nothing.
pub fn bootstrap_admin(conn: &Connection, email: &str) -> Result<BootstrapOutcome> {
    let email = normalize_email(email);
    let user = queries::get_user_by_email(conn, &email)?;

    if user.as_ref().is_some_and(|u| u.is_admin) {
        tracing::info!("Bootstrap admin {} already promoted", email);
        return Ok(BootstrapOutcome::AlreadyAdmin);
    }

    if queries::count_admins(conn)? > 0 {
        tracing::info!("Admins already exist, skipping bootstrap");
        return Ok(BootstrapOutcome::AdminExists);
    }

    let Some(user) = user else {
        tracing::warn!("BOOTSTRAP_ADMIN_EMAIL {} has no account yet; register it and restart", email);
        return Ok(BootstrapOutcome::NoAccount);
    };

    queries::set_user_admin(conn, &user.id, true)?;
    let registered = Utc
        .timestamp_opt(user.created_at, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| user.created_at.to_string());
    tracing::warn!(
        user_id = %user.id,
        username = %user.username,
        registered = %registered,
        "Promoted {} to admin; email ownership is not verified, confirm this is the intended account",
        email
    );

    Ok(BootstrapOutcome::Promoted(User {
        is_admin: true,
        ..user
    }))
}
