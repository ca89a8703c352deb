use tether_crypto::SecretEnvelope;
use tracing::{debug, warn};

use super::commands::{INSTALLATION, MAIL_TABLE};
use super::{continuation, Orchestrator};
use crate::codec::decode;
use crate::config::ConfigError;
use crate::error::{HandshakeError, Result};
use crate::records::{InstallationRecord, Trio, TRIO_SLOTS};
use crate::shape::{decode_field, FromTree};

/// Decrypt the Trio held in a mail table envelope's `data` field. Any
/// other command is refused before the key is used.
pub fn open_mail_table(text: &str, key: &[u8]) -> Result<Trio> {
    let env = decode(text)?;
    env.expect_command(MAIL_TABLE)?;
    let data: SecretEnvelope = decode_field(&env.tree, "data")?;
    let plain = tether_crypto::open(&data, key)?;
    let plain = std::str::from_utf8(&plain).map_err(|_| HandshakeError::Decrypt)?;
    Trio::from_text(plain)
}

impl Orchestrator {
    /// The record SETUP TOKEN left in the `INSTALLATION` slot.
    pub(super) async fn installation(&self) -> Result<InstallationRecord> {
        let stored = self
            .services
            .slots
            .read(crate::config::INSTALLATION)
            .await?
            .ok_or(HandshakeError::Config(ConfigError::Missing(
                crate::config::INSTALLATION,
            )))?;
        InstallationRecord::from_tree(&continuation(&stored, INSTALLATION)?)
    }

    /// Trio for LOGIN CLOSE. A missing or unreadable inbox is not fatal:
    /// the operator gets an empty Trio and a warning.
    pub(super) async fn read_inbox(&self) -> Trio {
        let read = if self.settings.production {
            self.read_mail_table().await
        } else {
            self.read_trio_slots().await
        };
        match read {
            Ok(trio) => trio,
            Err(err) => {
                warn!(error = %err, "no passwords in inbox");
                Trio::default()
            }
        }
    }

    async fn read_mail_table(&self) -> Result<Trio> {
        let text = self.services.inbox.read().await;
        if text.is_empty() {
            warn!("missing inbox");
            return Ok(Trio::default());
        }
        let key = self.installation().await?.inbox_key()?;
        open_mail_table(&text, &key)
    }

    async fn read_trio_slots(&self) -> Result<Trio> {
        let mut values = Vec::with_capacity(TRIO_SLOTS.len());
        for name in TRIO_SLOTS {
            values.push(self.services.slots.read(name).await?.unwrap_or_default());
        }
        debug!(filled = values.iter().filter(|v| !v.is_empty()).count(), "read trio slots");
        Ok(Trio::new(&values[0], &values[1], &values[2]))
    }

    pub(super) async fn write_trio_slots(&self, trio: &Trio) -> Result<()> {
        for (name, value) in TRIO_SLOTS.iter().zip(trio.values()) {
            self.services.slots.write(name, value).await?;
        }
        Ok(())
    }
}
