use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::error::{AppError, Result};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a stored PHC hash. Malformed hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn validate_password(password: &str) -> Result<()> {
    let problem = if password.chars().count() < MIN_PASSWORD_LEN {
        Some("Password must be at least 8 characters long")
    } else if password.chars().any(char::is_whitespace) {
        Some("Password must not contain spaces")
    } else if !password.chars().any(|c| c.is_uppercase()) {
        Some("Password must contain an uppercase letter")
    } else if !password.chars().any(|c| c.is_lowercase()) {
        Some("Password must contain a lowercase letter")
    } else if !password.chars().any(|c| c.is_ascii_digit()) {
        Some("Password must contain a digit")
    } else if password.chars().all(char::is_alphanumeric) {
        Some("Password must contain a special character")
    } else {
        None
    };

    match problem {
        Some(p) => Err(AppError::BadRequest(p.into())),
        None => Ok(()),
    }
}

pub fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !USERNAME_LEN.contains(&len) {
        return Err(AppError::BadRequest(
            "Username must be between 3 and 20 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(AppError::BadRequest(
            "Username may only contain letters, digits, '.', '_' and '-'".into(),
        ));
    }
    Ok(())
}

/// Shape check only; ownership of the address is not verified.
pub fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid email address".into()))
    }
}
