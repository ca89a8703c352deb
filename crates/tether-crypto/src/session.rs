//! Session hashes
//!
//! LOGIN CLOSE hands the operator an Argon2id PHC string of the session
//! token. A later run may present the token (`SESSION`) with that hash
//! (`OLD_HASH`) to mark its session resettable.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;

use crate::{CryptoError, Result};

/// Hash a session token into a PHC string.
pub fn hash_session(token: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::SessionHash(e.to_string()))
}

/// Check a session token against a stored PHC string.
///
/// Empty inputs and unparseable hashes never verify.
pub fn verify_session(old_hash: &str, session: &str) -> bool {
    if old_hash.is_empty() || session.is_empty() {
        return false;
    }
    let Ok(parsed) = PasswordHash::new(old_hash) else {
        tracing::warn!("stored session hash is not a PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(session.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let hash = hash_session("a1b2c3").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_session(&hash, "a1b2c3"));
        assert!(!verify_session(&hash, "a1b2c4"));
    }

    #[test]
    fn test_empty_or_garbage_never_verifies() {
        let hash = hash_session("a1b2c3").unwrap();
        assert!(!verify_session("", "a1b2c3"));
        assert!(!verify_session(&hash, ""));
        assert!(!verify_session("not-a-phc-string", "a1b2c3"));
    }
}
