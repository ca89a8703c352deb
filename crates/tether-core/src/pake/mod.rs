//! PAKE adapter
//!
//! Typed boundary around the external password-authenticated key exchange.
//! The primitive's math lives behind [`PakeClient`] and [`PakeServer`];
//! this module only fixes the message shapes the workflows exchange.
//!
//! Rejections come back as `Err(RejectCode)` rather than a number mixed
//! into the success value, so an error code can never be mistaken for
//! session data.

pub mod sim;

use secrecy::SecretString;
use subtle::ConstantTimeEq;
use tether_crypto::CipherItem;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{RejectCode, Result};

pub use sim::SimulatedPake;

/// Stretching rounds both sides apply to the password file key.
pub const PAKE_ITERATIONS: u32 = 1000;

/// The client's key confirmation did not match the server's final state.
pub const REJECT_CLIENT_PROOF: RejectCode = RejectCode(5);

/// Client's first message (`client_auth_data`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthData {
    pub sid: String,
    pub pw: Vec<u8>,
    /// `Xu`
    pub user_ephemeral: Vec<u8>,
    pub alpha: Vec<u8>,
}

/// The server's wrapped credential envelope (`c`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    /// `pu`
    pub user_private: CipherItem,
    /// `Pu`
    pub user_public: CipherItem,
    /// `Ps`
    pub server_public: CipherItem,
}

/// Server's response (`server_auth_data`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAuthData {
    /// `As`
    pub server_proof: Vec<u8>,
    /// `Xs`
    pub server_ephemeral: Vec<u8>,
    pub beta: Vec<u8>,
    pub credentials: ServerCredentials,
}

/// Client's key confirmation (`client_auth_result`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthResult {
    /// `Au`
    pub client_proof: Vec<u8>,
}

/// Server's final view: the proof it expects and the shared token.
#[derive(Debug, Clone)]
pub struct ServerFinal {
    /// `Au`
    pub client_proof: Vec<u8>,
    pub token: SecretString,
}

/// Ephemeral client randomness kept between `client_init` and
/// `client_finish`. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ClientState {
    pub r: Vec<u8>,
    pub xu: Vec<u8>,
    pub mask: Vec<u8>,
}

impl std::fmt::Debug for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientState([REDACTED])")
    }
}

/// Successful client completion.
#[derive(Debug, Clone)]
pub struct ClientSecret {
    pub token: SecretString,
    pub result: ClientAuthResult,
}

/// Client half of the exchange.
pub trait PakeClient: Send + Sync {
    /// Start an exchange for `user_id` under `password`.
    fn client_init(
        &self,
        user_id: &str,
        password: &SecretString,
    ) -> Result<(ClientState, ClientAuthData)>;

    /// Check the server's response and derive the shared token.
    fn client_finish(
        &self,
        state: &ClientState,
        server: &ServerAuthData,
        iterations: u32,
    ) -> std::result::Result<ClientSecret, RejectCode>;
}

/// Server half of the exchange.
pub trait PakeServer: Send + Sync {
    /// Answer a client's first message. Returns the relay response and the
    /// final state the server keeps until the client proves the key.
    fn server_auth(
        &self,
        pepper: &[u8],
        data: &ClientAuthData,
        iterations: u32,
    ) -> std::result::Result<(ServerAuthData, ServerFinal), RejectCode>;

    /// Accept the client's proof of key against the kept final state.
    fn server_finish(
        &self,
        last: &ServerFinal,
        result: &ClientAuthResult,
    ) -> std::result::Result<(), RejectCode> {
        if bool::from(last.client_proof.as_slice().ct_eq(&result.client_proof)) {
            Ok(())
        } else {
            Err(REJECT_CLIENT_PROOF)
        }
    }
}
