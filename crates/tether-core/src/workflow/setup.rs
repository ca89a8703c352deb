use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use zeroize::Zeroizing;

use super::commands::{
    INSTALLATION, SETUP_APP_IN, SETUP_APP_OUT, SETUP_PUB_OUT, SETUP_TOKEN_OUT, STEP,
};
use super::{continuation, envelope, Orchestrator, PhaseOutput, SETUP_USER_ID};
use crate::codec::{Node, Tree};
use crate::config::{ConfigError, ROOT_PEPPER};
use crate::error::{HandshakeError, Result};
use crate::pake::ClientState;
use crate::records::{InstallationRecord, Pasted, TokenInputs};
use crate::shape::{FromTree, ToTree};

/// Random bytes in a fresh SETUP password.
pub const PASSWORD_BYTES: usize = 3 * 23;

fn new_password() -> SecretString {
    let mut bytes = Zeroizing::new([0u8; PASSWORD_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    SecretString::new(STANDARD.encode(&bytes[..]))
}

fn single(key: &str, tree: Tree) -> Tree {
    let mut outer = Tree::new();
    outer.insert(key.to_string(), Node::Tree(tree));
    outer
}

impl Orchestrator {
    /// SETUP PUB: start a PAKE exchange under a fresh random password.
    pub(super) fn setup_pub(&self) -> Result<PhaseOutput> {
        let password = new_password();
        let (state, data) = self.services.client.client_init(SETUP_USER_ID, &password)?;

        let for_pages = envelope(SETUP_PUB_OUT, single("client_auth_data", data.to_tree()))?;
        let for_next = envelope(STEP, state.to_tree())?;
        Ok(PhaseOutput::new(for_pages, for_next))
    }

    /// SETUP APP: finish the exchange against the pasted server response,
    /// open the sealed manifest code with the shared token and trade it
    /// for app credentials.
    pub(super) async fn setup_app(&self, given: &str) -> Result<PhaseOutput> {
        let state = ClientState::from_tree(&continuation(given, STEP)?)?;

        let (_, pasted) = self
            .await_relay("GitHub App", SETUP_APP_IN, Pasted::from_tree)
            .await?;

        let secret = self
            .services
            .client
            .client_finish(&state, &pasted.server, self.settings.iterations)
            .map_err(HandshakeError::PakeRejected)?;
        drop(state);

        let shared = secret.token.expose_secret();
        let code = tether_crypto::open(&pasted.code, shared.as_bytes())?;
        let code = std::str::from_utf8(&code).map_err(|_| HandshakeError::Decrypt)?;
        let app = self.services.apps.exchange_code(code).await?;
        info!(app_id = %app.id, "app credentials received");

        let for_pages = envelope(
            SETUP_APP_OUT,
            single("client_auth_result", secret.result.to_tree()),
        )?;
        let inputs = TokenInputs {
            shared: secret.token.clone(),
            app,
        };
        let for_next = envelope(STEP, inputs.to_tree())?;
        Ok(PhaseOutput::new(for_pages, for_next))
    }

    /// SETUP TOKEN: wait for the app to be installed, mint an
    /// installation token, record it, and hand it to the counterpart
    /// sealed under the shared token.
    pub(super) async fn setup_token(&self, given: &str) -> Result<PhaseOutput> {
        let inputs = TokenInputs::from_tree(&continuation(given, STEP)?)?;
        if self.settings.production && !self.services.slots.is_sealed() {
            return Err(HandshakeError::Config(ConfigError::Missing(ROOT_PEPPER)));
        }

        info!(owner = %self.settings.owner, "awaiting app installation");
        let installs = &self.services.installs;
        let app = &inputs.app;
        let owner = self.settings.owner.as_str();
        let found = self
            .settings
            .retry
            .poll("app installation", move || async move {
                installs
                    .find_installation(app, owner)
                    .await
                    .map_err(HandshakeError::from)
            })
            .await?;
        let installed = installs.mint_token(app, &found).await?;
        info!(installation = installed.id, "installation token minted");

        let token = installed.token.clone();
        let record = InstallationRecord {
            installed,
            shared: inputs.shared.clone(),
            app: inputs.app.clone(),
        };
        let stored = envelope(INSTALLATION, record.to_tree())?;
        let owner_store = self.services.owner_slots.for_token(&token)?;
        self.services
            .slots
            .rebind(owner_store)
            .write(crate::config::INSTALLATION, &stored)
            .await?;

        let sealed = tether_crypto::seal(
            token.expose_secret().as_bytes(),
            inputs.shared.expose_secret().as_bytes(),
        )?;
        let for_pages = envelope(SETUP_TOKEN_OUT, sealed.to_tree())?;
        Ok(PhaseOutput::new(for_pages, String::new()))
    }
}
