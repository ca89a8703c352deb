use tracing::info;

use super::commands::{LOGIN_CLOSE_IN, LOGIN_OPEN_IN, MAIL_TABLE};
use super::login::{login_end, login_start};
use super::{open_mail_table, Orchestrator, PhaseOutput};
use crate::codec::decode;
use crate::error::{HandshakeError, Result};

/// Where development data lives, for the production refusal message.
const DEV_HOME: &str = "dev.txt";

impl Orchestrator {
    fn development_only(&self) -> Result<()> {
        if self.settings.production {
            return Err(HandshakeError::ProtocolMismatch(format!(
                "Data only in {DEV_HOME} during development"
            )));
        }
        Ok(())
    }

    /// DEV OPEN: wait for a client's first message in the dev mailbox,
    /// then run LOGIN OPEN on it.
    pub(super) async fn dev_open(&self) -> Result<PhaseOutput> {
        self.development_only()?;
        let (relay, _) = self
            .await_relay("login start", LOGIN_OPEN_IN, login_start)
            .await?;
        self.login_open(&relay).await
    }

    /// DEV CLOSE: wait for the client's proof in the dev mailbox, then
    /// run LOGIN CLOSE against the stored session state.
    pub(super) async fn dev_close(&self) -> Result<PhaseOutput> {
        self.development_only()?;
        let (relay, _) = self
            .await_relay("login end", LOGIN_CLOSE_IN, login_end)
            .await?;
        self.login_close(&relay, None).await
    }

    /// DEV INBOX: decrypt a `mail__table` envelope and store the Trio in
    /// its slots. Unlike LOGIN's inbox read, every failure here is fatal.
    pub(super) async fn dev_inbox(&self) -> Result<PhaseOutput> {
        self.development_only()?;
        let text = self.services.inbox.read().await;
        if text.is_empty() {
            return Err(HandshakeError::ProtocolMismatch(
                "missing dev inbox".to_string(),
            ));
        }
        decode(&text)?.expect_command(MAIL_TABLE)?;
        let key = self.installation().await?.inbox_key()?;
        let trio = open_mail_table(&text, &key)?;
        self.write_trio_slots(&trio).await?;
        info!("dev inbox stored");
        Ok(PhaseOutput::default())
    }
}
