// fulfillment/src/services/admin_auth.rs

//! Admin bearer-token hashing and verification (Argon2).

use crate::errors::AppError;
use argon2::{
  password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
  Argon2,
};
use tracing::{debug, error, instrument};

/// Produces the value operators put into `ADMIN_TOKEN_HASH`.
#[instrument(name = "admin_auth::hash_admin_token", skip(token), err(Display))]
pub fn hash_admin_token(token: &str) -> Result<String, AppError> {
  if token.trim().is_empty() {
    return Err(AppError::Validation("Admin token cannot be empty.".to_string()));
  }

  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(token.as_bytes(), &salt)
    .map(|hash| hash.to_string())
    .map_err(|e| {
      error!(error = %e, "Argon2 hashing failed.");
      AppError::Internal(format!("Admin token hashing failed: {}", e))
    })
}

/// Returns `Ok(false)` on a mismatch and an error only when the stored hash is unusable.
#[instrument(name = "admin_auth::verify_admin_token", skip_all, err(Display))]
pub fn verify_admin_token(stored_hash: &str, provided_token: &str) -> Result<bool, AppError> {
  if provided_token.is_empty() {
    return Ok(false);
  }

  let parsed_hash = PasswordHash::new(stored_hash).map_err(|e| {
    error!(error = %e, "Stored admin token hash cannot be parsed.");
    AppError::Config(format!("Invalid ADMIN_TOKEN_HASH: {}", e))
  })?;

  match Argon2::default().verify_password(provided_token.as_bytes(), &parsed_hash) {
    Ok(()) => Ok(true),
    Err(argon2::password_hash::Error::Password) => {
      debug!("Admin token mismatch.");
      Ok(false)
    }
    Err(other) => {
      error!(error = %other, "Argon2 verification failed.");
      Err(AppError::Internal(format!("Admin token verification failed: {}", other)))
    }
  }
}
