//! Handshake error taxonomy
//!
//! Every failure a phase can hit lands in one of these variants. The raw
//! detail is for local logs only; operators see [`HandshakeError::public_message`].

use tether_crypto::CryptoError;
use tether_relay::RelayError;
use thiserror::Error;

use crate::config::ConfigError;

/// Numeric rejection code returned by the PAKE primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectCode(pub u32);

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Relay text could not be split or decoded.
    #[error("Poorly formatted workflow inputs: {0}")]
    Format(String),

    /// A decoded tree is missing a field or has the wrong type.
    #[error("Invalid workflow inputs: {0}")]
    Shape(String),

    /// Wrong command tag, wrong session, or an out-of-order phase.
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Decryption failed")]
    Decrypt,

    #[error("Opaque error code: {0}")]
    PakeRejected(RejectCode),

    #[error("Timeout after {tries} tries waiting for {waiting_for}")]
    Timeout {
        tries: u32,
        waiting_for: &'static str,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Local failure unrelated to relay input (RNG, KDF parameters).
    #[error("Local error: {0}")]
    Local(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HandshakeError {
    /// Fixed operator-facing message. Cryptographic failures share one
    /// message so the output never reveals which check failed.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Format(_) | Self::Shape(_) | Self::ProtocolMismatch(_) => "Invalid workflow inputs.",
            Self::Decrypt | Self::PakeRejected(_) => "Unable to verify.",
            Self::Timeout { .. } => "Timed out waiting for the relay.",
            Self::Upstream(_) => "Upstream service error.",
            Self::Local(_) => "Unexpected local error.",
            Self::Config(_) => "Invalid configuration.",
        }
    }
}

impl From<CryptoError> for HandshakeError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Shape(detail) => Self::Shape(detail),
            CryptoError::Decryption | CryptoError::InvalidKeySize { .. } => Self::Decrypt,
            CryptoError::Encryption
            | CryptoError::KeyDerivation(_)
            | CryptoError::SessionHash(_) => Self::Local(err.to_string()),
        }
    }
}

impl From<RelayError> for HandshakeError {
    fn from(err: RelayError) -> Self {
        Self::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HandshakeError>;
