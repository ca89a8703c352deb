//! Tether Relay - the untrusted text channels and the services around them
//!
//! - `mailbox`: the single best-effort text slot both sides poll
//! - `slots`: durable named values (STATE, INSTALLATION, the Trio)
//! - `github`: issue-body mailbox and environment-variable slots
//! - `apps`: app-manifest exchange and installation tokens

pub mod apps;
pub mod github;
pub mod mailbox;
pub mod slots;

pub use apps::{AppCredentials, AppFactory, GithubApps, InstallationProvider, InstallationRef, Installed};
pub use github::{GithubClient, GithubSlots, RemoteMailbox};
pub use mailbox::{EnvMailbox, LocalMailbox, Mailbox, MemoryMailbox};
pub use slots::{DotenvSlots, MemorySlots, SharedSlotAccess, SlotAccess, SlotStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error (status {status:?}): {message}")]
    Http {
        status: Option<u16>,
        message: String,
    },

    #[error("JWT signing failed: {0}")]
    Jwt(String),

    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("{0} is read-only")]
    ReadOnly(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
