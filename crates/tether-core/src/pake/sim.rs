//! Simulated PAKE engine
//!
//! A deterministic SHA-256 stand-in that honours the same message
//! contract as the real primitive. DEV mode and the test suites drive it
//! from both sides. It is not a secure key exchange.

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tether_crypto::cipher;
use zeroize::Zeroizing;

use super::{
    ClientAuthData, ClientAuthResult, ClientSecret, ClientState, PakeClient, PakeServer,
    ServerAuthData, ServerCredentials, ServerFinal,
};
use crate::error::{HandshakeError, RejectCode, Result};

const WIDTH: usize = 32;

pub const REJECT_MALFORMED: RejectCode = RejectCode(1);
pub const REJECT_BETA: RejectCode = RejectCode(2);
pub const REJECT_ENVELOPE: RejectCode = RejectCode(3);
pub const REJECT_SERVER_PROOF: RejectCode = RejectCode(4);

/// Domain-separated hash over length-prefixed parts.
fn prf(label: &[u8], parts: &[&[u8]]) -> [u8; WIDTH] {
    let mut hasher = Sha256::new();
    hasher.update(b"tether-sim/");
    hasher.update(label);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn random_bytes() -> Vec<u8> {
    let mut out = vec![0u8; WIDTH];
    OsRng.fill_bytes(&mut out);
    out
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

fn stretch(pw: &[u8], iterations: u32) -> Zeroizing<[u8; WIDTH]> {
    let mut key = Zeroizing::new(prf(b"stretch", &[pw]));
    for _ in 1..iterations {
        *key = prf(b"stretch", &[&key[..]]);
    }
    key
}

fn session_token(key: &[u8], user_eph: &[u8], server_eph: &[u8], alpha: &[u8]) -> [u8; WIDTH] {
    prf(b"token", &[key, user_eph, server_eph, alpha])
}

fn open_item(key: &[u8], item: &tether_crypto::CipherItem, aad: &[u8]) -> Option<Vec<u8>> {
    cipher::decrypt(key, item, aad).ok().map(|v| v.to_vec())
}

/// Hash-based engine implementing both halves of the exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedPake;

impl SimulatedPake {
    pub fn new() -> Self {
        Self
    }
}

impl PakeClient for SimulatedPake {
    fn client_init(
        &self,
        user_id: &str,
        password: &SecretString,
    ) -> Result<(ClientState, ClientAuthData)> {
        if password.expose_secret().is_empty() {
            return Err(HandshakeError::Local("empty PAKE password".to_string()));
        }
        let r = random_bytes();
        let xu = random_bytes();

        let pw = prf(b"pw", &[user_id.as_bytes(), password.expose_secret().as_bytes()]);
        let mask = xor(&pw, &prf(b"mask", &[&r]));
        let alpha = prf(b"alpha", &[&r, &pw]);

        let data = ClientAuthData {
            sid: user_id.to_string(),
            pw: pw.to_vec(),
            user_ephemeral: prf(b"pub", &[&xu]).to_vec(),
            alpha: alpha.to_vec(),
        };
        Ok((ClientState { r, xu, mask }, data))
    }

    fn client_finish(
        &self,
        state: &ClientState,
        server: &ServerAuthData,
        iterations: u32,
    ) -> std::result::Result<ClientSecret, RejectCode> {
        if state.r.len() != WIDTH || state.xu.len() != WIDTH || state.mask.len() != WIDTH {
            return Err(REJECT_MALFORMED);
        }
        let pw = Zeroizing::new(xor(&state.mask, &prf(b"mask", &[&state.r])));
        let alpha = prf(b"alpha", &[&state.r, &pw]);
        let user_eph = prf(b"pub", &[&state.xu]);

        let beta = prf(b"beta", &[&alpha, &pw]);
        if !bool::from(beta.as_slice().ct_eq(&server.beta)) {
            return Err(REJECT_BETA);
        }

        let key = stretch(&pw, iterations);
        let creds = &server.credentials;
        let server_public = open_item(&key[..], &creds.server_public, b"Ps");
        let user_public = open_item(&key[..], &creds.user_public, b"Pu");
        let user_private = open_item(&key[..], &creds.user_private, b"pu");
        match (server_public, user_public, user_private) {
            (Some(ps), Some(pu_pub), Some(_))
                if ps == server.server_ephemeral && pu_pub == user_eph => {}
            _ => return Err(REJECT_ENVELOPE),
        }

        let token = session_token(&key[..], &user_eph, &server.server_ephemeral, &alpha);
        let expected = prf(b"As", &[&token]);
        if !bool::from(expected.as_slice().ct_eq(&server.server_proof)) {
            return Err(REJECT_SERVER_PROOF);
        }

        Ok(ClientSecret {
            token: SecretString::new(hex::encode(token)),
            result: ClientAuthResult {
                client_proof: prf(b"Au", &[&token]).to_vec(),
            },
        })
    }
}

impl PakeServer for SimulatedPake {
    fn server_auth(
        &self,
        pepper: &[u8],
        data: &ClientAuthData,
        iterations: u32,
    ) -> std::result::Result<(ServerAuthData, ServerFinal), RejectCode> {
        if data.pw.len() != WIDTH || data.user_ephemeral.len() != WIDTH || data.alpha.len() != WIDTH
        {
            return Err(REJECT_MALFORMED);
        }
        let xs = prf(b"xs", &[pepper, data.sid.as_bytes(), &random_bytes()]);
        let server_eph = prf(b"pub", &[&xs]);
        let beta = prf(b"beta", &[&data.alpha, &data.pw]);

        let key = stretch(&data.pw, iterations);
        let seal = |plain: &[u8], aad: &[u8]| {
            cipher::encrypt(&key[..], plain, aad).map_err(|_| REJECT_MALFORMED)
        };
        let credentials = ServerCredentials {
            user_private: seal(&prf(b"pu", &[&key[..]]), b"pu")?,
            user_public: seal(&data.user_ephemeral, b"Pu")?,
            server_public: seal(&server_eph, b"Ps")?,
        };

        let token = session_token(&key[..], &data.user_ephemeral, &server_eph, &data.alpha);
        let auth = ServerAuthData {
            server_proof: prf(b"As", &[&token]).to_vec(),
            server_ephemeral: server_eph.to_vec(),
            beta: beta.to_vec(),
            credentials,
        };
        let last = ServerFinal {
            client_proof: prf(b"Au", &[&token]).to_vec(),
            token: SecretString::new(hex::encode(token)),
        };
        Ok((auth, last))
    }
}
