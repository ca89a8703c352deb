//! Sealed durable slots
//!
//! Production slots live in a remote store anyone with repository access
//! can read, so each value is sealed with a Secret Envelope under the
//! root pepper before it leaves the process. Without a pepper
//! (development) values pass through unchanged.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tether_crypto::SecretEnvelope;
use tether_relay::SlotStore;
use tracing::debug;

use crate::codec::{decode, Envelope};
use crate::error::{HandshakeError, Result};
use crate::shape::{FromTree, ToTree};

/// Command tag of a sealed slot value.
pub const SEALED_COMMAND: &str = "sealed";

#[derive(Clone)]
pub struct SealedSlots {
    inner: Arc<dyn SlotStore>,
    pepper: Option<SecretString>,
}

impl std::fmt::Debug for SealedSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSlots")
            .field("sealed", &self.pepper.is_some())
            .finish_non_exhaustive()
    }
}

impl SealedSlots {
    pub fn new(inner: Arc<dyn SlotStore>, pepper: SecretString) -> Self {
        Self {
            inner,
            pepper: Some(pepper),
        }
    }

    /// Values are stored as given.
    pub fn plain(inner: Arc<dyn SlotStore>) -> Self {
        Self {
            inner,
            pepper: None,
        }
    }

    /// Same pepper over another store.
    pub fn rebind(&self, inner: Arc<dyn SlotStore>) -> Self {
        Self {
            inner,
            pepper: self.pepper.clone(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.pepper.is_some()
    }

    pub async fn read(&self, name: &str) -> Result<Option<String>> {
        let Some(stored) = self.inner.read(name).await? else {
            return Ok(None);
        };
        let Some(pepper) = &self.pepper else {
            return Ok(Some(stored));
        };
        Ok(Some(unseal(&stored, pepper)?))
    }

    pub async fn write(&self, name: &str, value: &str) -> Result<()> {
        let stored = match &self.pepper {
            Some(pepper) => seal(value, pepper)?,
            None => value.to_string(),
        };
        debug!(slot = name, sealed = self.is_sealed(), "writing slot");
        self.inner.write(name, &stored).await?;
        Ok(())
    }

    pub async fn clear(&self, name: &str) -> Result<()> {
        self.inner.clear(name).await?;
        Ok(())
    }
}

/// Seal `value` as relay text under `pepper`.
pub fn seal(value: &str, pepper: &SecretString) -> Result<String> {
    let envelope = tether_crypto::seal(value.as_bytes(), pepper.expose_secret().as_bytes())?;
    Envelope::new(SEALED_COMMAND, envelope.to_tree()).encode()
}

/// Reverse of [`seal`].
pub fn unseal(stored: &str, pepper: &SecretString) -> Result<String> {
    let env = decode(stored)?;
    env.expect_command(SEALED_COMMAND)?;
    let envelope = SecretEnvelope::from_tree(&env.tree)?;
    let plain = tether_crypto::open(&envelope, pepper.expose_secret().as_bytes())?;
    String::from_utf8(plain.to_vec()).map_err(|_| HandshakeError::Decrypt)
}
