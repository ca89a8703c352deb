//! ChaCha20-Poly1305 cipher items
//!
//! Each encryption yields a detached `iv, tag, ciphertext` triple so the
//! relay text can carry every field on its own. A fresh random IV is drawn
//! for every call; keys are never reused with a caller-chosen nonce.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce, Tag,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{CryptoError, Result};

/// 256-bit key (32 bytes)
pub const KEY_SIZE: usize = 32;
/// 96-bit IV (12 bytes)
pub const IV_SIZE: usize = 12;
/// 128-bit Poly1305 tag (16 bytes)
pub const TAG_SIZE: usize = 16;

/// One authenticated encryption result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherItem {
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl CipherItem {
    /// Check field widths without touching the key.
    pub fn check_shape(&self) -> Result<()> {
        if self.iv.len() != IV_SIZE {
            return Err(CryptoError::Shape(format!(
                "iv must be {IV_SIZE} bytes, got {}",
                self.iv.len()
            )));
        }
        if self.tag.len() != TAG_SIZE {
            return Err(CryptoError::Shape(format!(
                "tag must be {TAG_SIZE} bytes, got {}",
                self.tag.len()
            )));
        }
        Ok(())
    }
}

/// Generate a cryptographically secure random key
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(key.as_mut());
    key
}

/// Generate a cryptographically secure random IV
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn cipher_for(key: &[u8]) -> Result<ChaCha20Poly1305> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeySize {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeySize {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

/// Encrypt plaintext, binding `aad` into the tag.
pub fn encrypt(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<CipherItem> {
    let cipher = cipher_for(key)?;
    let iv = generate_iv();

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer)
        .map_err(|_| CryptoError::Encryption)?;

    Ok(CipherItem {
        iv: iv.to_vec(),
        tag: tag.to_vec(),
        ciphertext: buffer,
    })
}

/// Decrypt an item produced by [`encrypt`].
///
/// The tag is verified before any plaintext is released; on failure the
/// scratch buffer is zeroized and nothing is returned.
pub fn decrypt(key: &[u8], item: &CipherItem, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    item.check_shape()?;
    let cipher = cipher_for(key)?;

    let mut buffer = Zeroizing::new(item.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&item.iv),
            aad,
            buffer.as_mut_slice(),
            Tag::from_slice(&item.tag),
        )
        .map_err(|_| CryptoError::Decryption)?;

    Ok(buffer)
}
