use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand_core::RngCore;

use crate::error::{AuthError, Result};

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {}", e)))
}

/// `false` on mismatch. A stored hash that does not parse is an internal
/// error, not a mismatch.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AuthError::Internal(format!("stored password hash is corrupt: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hash of 32 random bytes that are thrown away, so nobody can ever log in
/// with it. Gives OAuth accounts a credential-bearing row.
pub fn unusable_password_hash() -> Result<String> {
    let mut secret = [0u8; 32];
    rand_core::OsRng.fill_bytes(&mut secret);
    hash_password(&URL_SAFE_NO_PAD.encode(secret))
}
