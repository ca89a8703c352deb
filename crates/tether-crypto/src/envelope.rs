//! Secret Envelope
//!
//! Two layers: a random data key encrypts the secret, and a key derived
//! from the passphrase (Argon2id over `salt`) wraps the data key.
//!
//! ```text
//! { salt, key: {iv, tag, ciphertext}, data: {iv, tag, ciphertext} }
//! ```
//!
//! `data` is never touched until `key` has authenticated, and no partial
//! plaintext is ever returned.

use zeroize::Zeroizing;

use crate::cipher::{self, CipherItem, KEY_SIZE};
use crate::kdf;
use crate::{CryptoError, Result};

const KEY_AAD: &[u8] = b"tether/secret-envelope/key";
const DATA_AAD: &[u8] = b"tether/secret-envelope/data";

/// A sealed secret, safe to place on an untrusted relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEnvelope {
    pub salt: Vec<u8>,
    pub key: CipherItem,
    pub data: CipherItem,
}

impl SecretEnvelope {
    /// Reject envelopes whose fields have the wrong widths.
    pub fn check_shape(&self) -> Result<()> {
        if self.salt.len() < kdf::MIN_SALT_SIZE {
            return Err(CryptoError::Shape("salt too short".to_string()));
        }
        self.key.check_shape()?;
        self.data.check_shape()
    }
}

/// Seal `secret` under `passphrase`.
pub fn seal(secret: &[u8], passphrase: &[u8]) -> Result<SecretEnvelope> {
    let salt = kdf::generate_salt();
    let wrapping_key = kdf::derive_key(passphrase, &salt)?;
    let data_key = cipher::generate_key();

    let key = cipher::encrypt(wrapping_key.as_ref(), data_key.as_ref(), KEY_AAD)?;
    let data = cipher::encrypt(data_key.as_ref(), secret, DATA_AAD)?;

    Ok(SecretEnvelope {
        salt: salt.to_vec(),
        key,
        data,
    })
}

/// Open an envelope sealed with [`seal`].
///
/// Returns [`CryptoError::Shape`] for malformed fields and
/// [`CryptoError::Decryption`] for any authentication failure, whichever
/// layer it happened in.
pub fn open(envelope: &SecretEnvelope, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    envelope.check_shape()?;

    let wrapping_key = kdf::derive_key(passphrase, &envelope.salt)?;
    let data_key = cipher::decrypt(wrapping_key.as_ref(), &envelope.key, KEY_AAD)?;
    if data_key.len() != KEY_SIZE {
        tracing::debug!("unwrapped data key has unexpected width");
        return Err(CryptoError::Decryption);
    }

    cipher::decrypt(&data_key, &envelope.data, DATA_AAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let sealed = seal(b"ghs_token", b"shared passphrase").unwrap();
        let opened = open(&sealed, b"shared passphrase").unwrap();
        assert_eq!(opened.as_slice(), b"ghs_token");
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = seal(b"ghs_token", b"shared passphrase").unwrap();
        assert!(matches!(
            open(&sealed, b"other passphrase"),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_flipped_data_bits_fail() {
        let sealed = seal(b"ghs_token", b"pw").unwrap();

        let mut bad_ct = sealed.clone();
        bad_ct.data.ciphertext[0] ^= 0x80;
        assert!(matches!(open(&bad_ct, b"pw"), Err(CryptoError::Decryption)));

        let mut bad_tag = sealed.clone();
        bad_tag.data.tag[15] ^= 0x01;
        assert!(matches!(open(&bad_tag, b"pw"), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_tampered_key_layer_fails() {
        let mut sealed = seal(b"ghs_token", b"pw").unwrap();
        sealed.key.ciphertext[3] ^= 0x10;
        assert!(matches!(open(&sealed, b"pw"), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_partial_envelope_rejected() {
        let mut sealed = seal(b"ghs_token", b"pw").unwrap();
        sealed.data.iv.clear();
        assert!(matches!(open(&sealed, b"pw"), Err(CryptoError::Shape(_))));
    }

    #[test]
    fn test_empty_secret() {
        let sealed = seal(b"", b"pw").unwrap();
        assert!(open(&sealed, b"pw").unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_open_inverts_seal(
            secret in proptest::collection::vec(any::<u8>(), 0..256),
            passphrase in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let sealed = seal(&secret, &passphrase).unwrap();
            let opened = open(&sealed, &passphrase).unwrap();
            prop_assert_eq!(opened.as_slice(), secret.as_slice());
        }

        #[test]
        fn prop_any_single_bit_flip_in_data_fails(
            secret in proptest::collection::vec(any::<u8>(), 1..64),
            bit in 0usize..8,
        ) {
            let sealed = seal(&secret, b"pw").unwrap();
            let mut flipped = sealed.clone();
            let idx = secret.len() / 2;
            flipped.data.ciphertext[idx] ^= 1 << bit;
            prop_assert!(open(&flipped, b"pw").is_err());
        }
    }
}
