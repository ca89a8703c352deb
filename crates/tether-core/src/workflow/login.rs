use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use tether_crypto::{hash_session, verify_session};
use tracing::{info, warn};

use super::commands::{
    LOGIN_CLOSE_IN, LOGIN_CLOSE_MAIL, LOGIN_CLOSE_USER, LOGIN_OPEN_IN, LOGIN_OPEN_NEXT,
    LOGIN_OPEN_OUT,
};
use super::{continuation, envelope, Orchestrator, PhaseOutput};
use crate::codec::{decode, Node, Tree};
use crate::config::STATE;
use crate::error::{HandshakeError, Result};
use crate::pake::{ClientAuthData, ClientAuthResult};
use crate::records::SessionState;
use crate::shape::{decode_field, text, FromTree, ToTree};

fn same_session(a: &SessionState, b: &SessionState) -> bool {
    let sid = a.sid.as_bytes().ct_eq(b.sid.as_bytes());
    let proof = a.last.client_proof.ct_eq(&b.last.client_proof);
    let token = a
        .last
        .token
        .expose_secret()
        .as_bytes()
        .ct_eq(b.last.token.expose_secret().as_bytes());
    bool::from(sid & proof & token)
}

/// Parse the client's first message.
pub(super) fn login_start(tree: &Tree) -> Result<ClientAuthData> {
    decode_field(tree, "client_auth_data")
}

/// Parse the client's proof of key and the session id it names, if any.
pub(super) fn login_end(tree: &Tree) -> Result<(ClientAuthResult, Option<String>)> {
    let result = decode_field(tree, "client_auth_result")?;
    let sid = match tree.get("sid") {
        None => None,
        Some(_) => Some(text(tree, "sid")?),
    };
    Ok((result, sid))
}

impl Orchestrator {
    /// LOGIN OPEN: answer the client's first message and park the
    /// server's final state in the `STATE` slot.
    pub(super) async fn login_open(&self, relay: &str) -> Result<PhaseOutput> {
        let pepper = self.settings.require_pepper()?;
        let env = decode(relay)?;
        env.expect_command(LOGIN_OPEN_IN)?;
        let data = login_start(&env.tree)?;

        let (auth, last) = self
            .services
            .server
            .server_auth(pepper.expose_secret().as_bytes(), &data, self.settings.iterations)
            .map_err(HandshakeError::PakeRejected)?;

        let state = SessionState {
            sid: data.sid.clone(),
            last,
        };
        let for_next = envelope(LOGIN_OPEN_NEXT, state.to_tree())?;
        self.services.slots.write(STATE, &for_next).await?;

        let mut tree = Tree::new();
        tree.insert("sid".to_string(), Node::Text(data.sid));
        tree.insert("server_auth_data".to_string(), auth.to_tree().into());
        let for_pages = envelope(LOGIN_OPEN_OUT, tree)?;

        info!(sid = %state.sid, "login session opened");
        Ok(PhaseOutput::new(for_pages, for_next))
    }

    /// LOGIN CLOSE: check the client's proof against the parked state,
    /// then hand over the inbox sealed under the session token.
    pub(super) async fn login_close(
        &self,
        relay: &str,
        given: Option<&str>,
    ) -> Result<PhaseOutput> {
        let env = decode(relay)?;
        env.expect_command(LOGIN_CLOSE_IN)?;
        let (result, claimed_sid) = login_end(&env.tree)?;

        let stored = self
            .services
            .slots
            .read(STATE)
            .await?
            .ok_or_else(|| HandshakeError::ProtocolMismatch("no open login session".to_string()))?;
        let state = SessionState::from_tree(&continuation(&stored, LOGIN_OPEN_NEXT)?)?;

        if let Some(given) = given {
            let offered = SessionState::from_tree(&continuation(given, LOGIN_OPEN_NEXT)?)?;
            if !same_session(&state, &offered) {
                return Err(HandshakeError::ProtocolMismatch(
                    "continuation does not match the open session".to_string(),
                ));
            }
        }
        if let Some(sid) = claimed_sid {
            if sid != state.sid {
                return Err(HandshakeError::ProtocolMismatch(format!(
                    "proof for session {sid:?}, open session is {:?}",
                    state.sid
                )));
            }
        }

        self.services
            .server
            .server_finish(&state.last, &result)
            .map_err(HandshakeError::PakeRejected)?;
        // One proof per opened session.
        self.services.slots.clear(STATE).await?;

        let reset = self.can_reset();
        let trio = self.read_inbox().await;
        let token = state.last.token.expose_secret();

        let mail = tether_crypto::seal(trio.to_text().as_bytes(), token.as_bytes())?;
        let mut user = Tree::new();
        user.insert("sid".to_string(), Node::Text(state.sid.clone()));
        user.insert("mail".to_string(), mail.to_tree().into());
        let for_pages = envelope(LOGIN_CLOSE_USER, user)?;

        let mut session = Tree::new();
        session.insert("sid".to_string(), Node::Text(state.sid.clone()));
        session.insert("hash".to_string(), Node::Text(hash_session(token)?));
        session.insert("reset".to_string(), Node::Number(i64::from(reset)));
        let for_next = envelope(LOGIN_CLOSE_MAIL, session)?;

        info!(sid = %state.sid, reset, "login session verified");
        Ok(PhaseOutput::new(for_pages, for_next))
    }

    /// The operator-gated reset: `SESSION` must verify against `OLD_HASH`.
    /// It only marks the new session; it never skips a check.
    fn can_reset(&self) -> bool {
        match (&self.settings.old_hash, &self.settings.session) {
            (Some(old_hash), Some(session)) => {
                let ok = verify_session(old_hash, session.expose_secret());
                if !ok {
                    warn!("SESSION does not match OLD_HASH");
                }
                ok
            }
            _ => false,
        }
    }
}
