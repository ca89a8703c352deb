//! Argon2id key derivation
//!
//! Relay text may be logged anywhere, so every passphrase-derived key goes
//! through a memory-hard function with fixed parameters.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::cipher::KEY_SIZE;
use crate::{CryptoError, Result};

/// Salt length written into new envelopes.
pub const SALT_SIZE: usize = 16;
/// Shortest salt Argon2 accepts.
pub const MIN_SALT_SIZE: usize = 8;

/// Memory cost in KiB.
const ARGON2_M_COST: u32 = 8 * 1024;
/// Passes over memory.
const ARGON2_T_COST: u32 = 3;
/// Lanes.
const ARGON2_P_COST: u32 = 1;

/// Generate a random salt for a new envelope.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit wrapping key from `passphrase` and `salt`.
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    if salt.len() < MIN_SALT_SIZE {
        return Err(CryptoError::Shape(format!(
            "salt must be at least {MIN_SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }

    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(KEY_SIZE))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase, salt, output.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = generate_salt();
        let a = derive_key(b"correct horse", &salt).unwrap();
        let b = derive_key(b"correct horse", &salt).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_salt_changes_key() {
        let a = derive_key(b"correct horse", &[1u8; SALT_SIZE]).unwrap();
        let b = derive_key(b"correct horse", &[2u8; SALT_SIZE]).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_short_salt_rejected() {
        assert!(matches!(
            derive_key(b"pw", &[0u8; 4]),
            Err(CryptoError::Shape(_))
        ));
    }
}
