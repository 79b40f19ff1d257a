use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use shared::{
    domain::{is_valid_username, UserProfile, DEFAULT_ROLE},
    error::{ApiError, ErrorCode},
};
use tracing::info;

use crate::{store_error, unique_violation, ApiContext};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::internal(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| ApiError::internal(format!("malformed password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub async fn register_user(
    ctx: &ApiContext,
    username: &str,
    password: &str,
) -> Result<UserProfile, ApiError> {
    if !is_valid_username(username) {
        return Err(ApiError::validation(
            "username may contain only letters, digits and underscores",
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let hash = hash_password(password)?;
    let user = ctx
        .storage
        .create_user(username, &hash, &[DEFAULT_ROLE.to_string()])
        .await
        .map_err(|err| unique_violation(err, || format!("username {username} is already taken")))?;
    info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Checks a username/password pair and returns the user's public profile.
pub async fn authenticate(
    ctx: &ApiContext,
    username: &str,
    password: &str,
) -> Result<UserProfile, ApiError> {
    let stored = ctx
        .storage
        .user_by_username(username)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found(format!("user {username} not found")))?;
    if !verify_password(password, &stored.password_hash)? {
        return Err(ApiError::new(ErrorCode::Unauthorized, "incorrect password"));
    }
    Ok(stored.profile)
}

#[cfg(test)]
#[path = "tests/accounts_tests.rs"]
mod tests;
