//! Records that travel between phases inside envelopes or durable slots.

use secrecy::{ExposeSecret, SecretString};
use tether_crypto::SecretEnvelope;
use tether_relay::apps::{AppCredentials, Installed};

use crate::error::{HandshakeError, Result};
use crate::pake::{ServerAuthData, ServerFinal};

/// Slot names of the three Trio values, in order.
pub const TRIO_SLOTS: [&str; 3] = ["SERVERS", "CLIENTS", "SECRETS"];

/// The three secrets handed to an authenticated operator.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Trio {
    pub servers: String,
    pub clients: String,
    pub secrets: String,
}

impl std::fmt::Debug for Trio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Trio([REDACTED]; empty={})", self.is_empty())
    }
}

impl Trio {
    pub fn new(servers: &str, clients: &str, secrets: &str) -> Self {
        Self {
            servers: servers.to_string(),
            clients: clients.to_string(),
            secrets: secrets.to_string(),
        }
    }

    /// Exactly three newline-separated values.
    pub fn from_text(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('\n').collect();
        match parts.as_slice() {
            [servers, clients, secrets] => Ok(Self::new(servers, clients, secrets)),
            _ => Err(HandshakeError::Shape(format!(
                "inbox holds {} values, expected 3",
                parts.len()
            ))),
        }
    }

    pub fn to_text(&self) -> String {
        self.values().join("\n")
    }

    pub fn values(&self) -> [&str; 3] {
        [self.servers.as_str(), self.clients.as_str(), self.secrets.as_str()]
    }

    pub fn is_empty(&self) -> bool {
        self.values().iter().all(|v| v.is_empty())
    }
}

/// SETUP APP continuation: the PAKE token and the new app.
#[derive(Debug, Clone)]
pub struct TokenInputs {
    pub shared: SecretString,
    pub app: AppCredentials,
}

/// What the counterpart pastes for SETUP APP: the sealed manifest code
/// (`C`) and its PAKE response (`S`).
#[derive(Debug, Clone)]
pub struct Pasted {
    pub code: SecretEnvelope,
    pub server: ServerAuthData,
}

/// Stored in the `INSTALLATION` slot by SETUP TOKEN.
#[derive(Debug, Clone)]
pub struct InstallationRecord {
    pub installed: Installed,
    /// Hex PAKE token shared with the counterpart.
    pub shared: SecretString,
    pub app: AppCredentials,
}

impl InstallationRecord {
    /// Inbox passphrase: the hex-decoded shared token.
    pub fn inbox_key(&self) -> Result<Vec<u8>> {
        hex::decode(self.shared.expose_secret())
            .map_err(|_| HandshakeError::Shape("shared must be hex".to_string()))
    }
}

/// LOGIN continuation kept between OPEN and CLOSE.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub sid: String,
    pub last: ServerFinal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trio_needs_exactly_three_lines() {
        let trio = Trio::from_text("s1,s2\nc1\nsecret").unwrap();
        assert_eq!(trio.servers, "s1,s2");
        assert_eq!(trio.to_text(), "s1,s2\nc1\nsecret");

        assert!(Trio::from_text("a\nb").is_err());
        assert!(Trio::from_text("a\nb\nc\nd").is_err());
        assert_eq!(Trio::from_text("\n\n").unwrap(), Trio::default());
    }

    #[test]
    fn test_trio_debug_redacts() {
        let shown = format!("{:?}", Trio::new("x", "y", "hunter2"));
        assert!(!shown.contains("hunter2"));
    }
}
