//! Tether Crypto - secret envelopes for untrusted relays
//!
//! This crate provides:
//! - ChaCha20-Poly1305 cipher items (`iv`, `tag`, `ciphertext`)
//! - Argon2id key derivation from low-entropy passphrases
//! - The two-layer Secret Envelope (`salt`, wrapped key, data)
//! - Session hashes used to gate the LOGIN reset path

pub mod cipher;
pub mod envelope;
pub mod kdf;
pub mod session;

pub use cipher::CipherItem;
pub use envelope::{open, seal, SecretEnvelope};
pub use session::{hash_session, verify_session};

/// Errors that can occur in cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed")]
    Decryption,

    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("Malformed envelope: {0}")]
    Shape(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Session hash failed: {0}")]
    SessionHash(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
