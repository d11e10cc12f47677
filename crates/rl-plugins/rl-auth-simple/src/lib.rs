//! # rl-auth-simple
//!
//! Argon2-based implementation of `AuthProvider`.
//! Stored passwords are PHC strings (`$argon2id$v=19$...`) carrying their own
//! salt and parameters, so verification needs nothing but the stored value.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rl_core::error::{AppError, Result};
use rl_core::traits::AuthProvider;

const SALT_LEN: usize = 16;

/// Verified against when there is no stored hash. Same algorithm and cost
/// parameters as `Argon2::default()`; no password produces this output.
const ABSENT_ACCOUNT_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

#[derive(Default)]
pub struct SimpleAuthProvider {
    argon2: Argon2<'static>,
}

impl SimpleAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthProvider for SimpleAuthProvider {
    /// Hashes with a fresh random salt per password.
    fn hash_password(&self, password: &str) -> Result<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt_bytes)
            .map_err(|e| AppError::Internal(format!("salt generation: {e}")))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::Internal(format!("salt encoding: {e}")))?;

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("password hashing: {e}")))
    }

    /// Verifies if a provided password matches a stored Argon2 hash.
    /// A stored value that is not a PHC string never matches.
    fn verify_password(&self, password: &str, hash: Option<&str>) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(hash.unwrap_or(ABSENT_ACCOUNT_HASH)) else {
            return false;
        };
        let matched = self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();
        matched && hash.is_some()
    }
}
