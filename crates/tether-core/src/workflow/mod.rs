//! Handshake orchestrator
//!
//! LOGIN, SETUP and DEV as explicit phase machines. Each phase is one
//! process invocation: it takes relay text and continuations in, and
//! hands back two artifacts, `for_pages` for the relay and `for_next`
//! to seed the next local phase. Nothing else survives the process
//! except what a phase writes to a durable slot.

mod dev;
mod inbox;
mod login;
mod setup;

use std::fmt;
use std::sync::Arc;

use secrecy::SecretString;
use tether_relay::{AppFactory, InstallationProvider, Mailbox, SlotAccess};
use tracing::{debug, info, warn};

use crate::codec::{decode, Envelope, Tree};
use crate::config::{Config, ConfigError, ROOT_PEPPER};
use crate::error::{HandshakeError, Result};
use crate::pake::{PakeClient, PakeServer, PAKE_ITERATIONS};
use crate::retry::RetryPolicy;
use crate::sealed::SealedSlots;

pub use inbox::open_mail_table;

/// Command tags carried on the relay and in continuations.
pub mod commands {
    pub const LOGIN_OPEN_IN: &str = "op:pake__client_auth_data";
    pub const LOGIN_OPEN_OUT: &str = "op:pake__server_auth_data";
    pub const LOGIN_OPEN_NEXT: &str = "token__server_final";
    pub const LOGIN_CLOSE_IN: &str = "op:pake__client_auth_result";
    pub const LOGIN_CLOSE_USER: &str = "mail__user";
    pub const LOGIN_CLOSE_MAIL: &str = "mail__session";

    pub const SETUP_PUB_OUT: &str = "app__in";
    pub const SETUP_APP_IN: &str = "app__code";
    pub const SETUP_APP_OUT: &str = "app__out";
    pub const SETUP_TOKEN_OUT: &str = "app__auth";
    pub const STEP: &str = "step";

    pub const MAIL_TABLE: &str = "mail__table";
    pub const INSTALLATION: &str = "installation";
}

/// PAKE user id of the service identity.
pub const SETUP_USER_ID: &str = "root";

/// Every phase of every workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowPhase {
    LoginOpen,
    LoginClose,
    SetupPub,
    SetupApp,
    SetupToken,
    DevOpen,
    DevClose,
    DevInbox,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 8] = [
        Self::LoginOpen,
        Self::LoginClose,
        Self::SetupPub,
        Self::SetupApp,
        Self::SetupToken,
        Self::DevOpen,
        Self::DevClose,
        Self::DevInbox,
    ];

    /// Operator-facing failure line. Input problems and verification
    /// problems are told apart only where it cannot leak which
    /// cryptographic check failed.
    pub fn failure_message(&self, err: &HandshakeError) -> &'static str {
        let bad_input = matches!(
            err,
            HandshakeError::Format(_) | HandshakeError::Shape(_) | HandshakeError::ProtocolMismatch(_)
        );
        match self {
            Self::LoginOpen | Self::LoginClose | Self::DevOpen | Self::DevClose | Self::DevInbox => {
                "Unable to verify"
            }
            Self::SetupPub => "Error making secure public channel.",
            Self::SetupApp if bad_input => "Can't create App.",
            Self::SetupApp => "Unable to make GitHub App.",
            Self::SetupToken if bad_input => "Can't create Token.",
            Self::SetupToken => "Unable to make GitHub Token.",
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            Self::LoginOpen | Self::DevOpen => "Began to verify user.",
            Self::LoginClose | Self::DevClose => "Verified user.",
            Self::SetupPub => "Created secure public channel.",
            Self::SetupApp => "Created GitHub App.",
            Self::SetupToken => "Created GitHub Token.",
            Self::DevInbox => "Loaded development inbox.",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoginOpen => "LOGIN OPEN",
            Self::LoginClose => "LOGIN CLOSE",
            Self::SetupPub => "SETUP PUB",
            Self::SetupApp => "SETUP APP",
            Self::SetupToken => "SETUP TOKEN",
            Self::DevOpen => "DEV OPEN",
            Self::DevClose => "DEV CLOSE",
            Self::DevInbox => "DEV INBOX",
        };
        f.write_str(name)
    }
}

/// One phase invocation with its inputs.
#[derive(Debug, Clone)]
pub enum PhaseRequest {
    /// `relay`: the client's `op:pake__client_auth_data` envelope.
    LoginOpen { relay: String },
    /// `relay`: the client's `op:pake__client_auth_result` envelope.
    /// `continuation`: OPEN's `for_next`, checked against the stored state.
    LoginClose {
        relay: String,
        continuation: Option<String>,
    },
    SetupPub,
    /// `continuation`: PUB's `for_next`.
    SetupApp { continuation: String },
    /// `continuation`: APP's `for_next`.
    SetupToken { continuation: String },
    DevOpen,
    DevClose,
    DevInbox,
}

impl PhaseRequest {
    pub fn phase(&self) -> WorkflowPhase {
        match self {
            Self::LoginOpen { .. } => WorkflowPhase::LoginOpen,
            Self::LoginClose { .. } => WorkflowPhase::LoginClose,
            Self::SetupPub => WorkflowPhase::SetupPub,
            Self::SetupApp { .. } => WorkflowPhase::SetupApp,
            Self::SetupToken { .. } => WorkflowPhase::SetupToken,
            Self::DevOpen => WorkflowPhase::DevOpen,
            Self::DevClose => WorkflowPhase::DevClose,
            Self::DevInbox => WorkflowPhase::DevInbox,
        }
    }
}

/// The two artifacts of a phase. Never merged into one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutput {
    pub for_pages: String,
    pub for_next: String,
}

impl PhaseOutput {
    pub fn new(for_pages: String, for_next: String) -> Self {
        Self {
            for_pages,
            for_next,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.for_pages.is_empty() && self.for_next.is_empty()
    }

    /// Contents of `secret.txt`.
    pub fn to_secret_text(&self) -> String {
        format!("{}\n{}", self.for_pages, self.for_next)
    }
}

/// External collaborators, chosen once at construction.
#[derive(Clone)]
pub struct Services {
    /// Relay the service side polls: issue body, or the dev file.
    pub mailbox: Arc<dyn Mailbox>,
    /// Encrypted Trio source (`MAIL__TABLE`).
    pub inbox: Arc<dyn Mailbox>,
    pub slots: SealedSlots,
    /// Slot stores for tokens minted mid-run. SETUP TOKEN writes its
    /// record with the installation token it has just made.
    pub owner_slots: Arc<dyn SlotAccess>,
    pub apps: Arc<dyn AppFactory>,
    pub installs: Arc<dyn InstallationProvider>,
    pub client: Arc<dyn PakeClient>,
    pub server: Arc<dyn PakeServer>,
}

/// Per-run settings derived from configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub owner: String,
    pub production: bool,
    pub retry: RetryPolicy,
    pub iterations: u32,
    pub root_pepper: Option<SecretString>,
    pub session: Option<SecretString>,
    pub old_hash: Option<String>,
}

impl Settings {
    pub fn from_config(config: &Config, retry: RetryPolicy) -> Self {
        Self {
            owner: config.owner.clone(),
            production: config.production,
            retry,
            iterations: PAKE_ITERATIONS,
            root_pepper: config.root_pepper.clone(),
            session: config.session.clone(),
            old_hash: config.old_hash.clone(),
        }
    }

    fn require_pepper(&self) -> Result<&SecretString> {
        self.root_pepper
            .as_ref()
            .ok_or(HandshakeError::Config(ConfigError::Missing(ROOT_PEPPER)))
    }
}

pub struct Orchestrator {
    services: Services,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(services: Services, settings: Settings) -> Self {
        Self { services, settings }
    }

    pub async fn run(&self, request: PhaseRequest) -> Result<PhaseOutput> {
        let phase = request.phase();
        info!(%phase, production = self.settings.production, "running phase");
        let output = match request {
            PhaseRequest::LoginOpen { relay } => self.login_open(&relay).await,
            PhaseRequest::LoginClose {
                relay,
                continuation,
            } => self.login_close(&relay, continuation.as_deref()).await,
            PhaseRequest::SetupPub => self.setup_pub(),
            PhaseRequest::SetupApp { continuation } => self.setup_app(&continuation).await,
            PhaseRequest::SetupToken { continuation } => self.setup_token(&continuation).await,
            PhaseRequest::DevOpen => self.dev_open().await,
            PhaseRequest::DevClose => self.dev_close().await,
            PhaseRequest::DevInbox => self.dev_inbox().await,
        };
        match &output {
            Ok(_) => info!(%phase, "{}", phase.success_message()),
            Err(err) => warn!(%phase, kind = err.public_message(), "phase failed"),
        }
        output
    }

    /// Poll the mailbox until it holds an envelope with `command` whose
    /// tree `parse` accepts. Stale or malformed content counts as "not
    /// there yet". Returns the raw text alongside the parsed value.
    async fn await_relay<T>(
        &self,
        waiting_for: &'static str,
        command: &'static str,
        parse: fn(&Tree) -> Result<T>,
    ) -> Result<(String, T)> {
        let mailbox = &self.services.mailbox;
        self.settings
            .retry
            .poll(waiting_for, move || async move {
                let text = mailbox.read().await;
                Ok::<_, HandshakeError>(accept(&text, command, parse).map(|value| (text, value)))
            })
            .await
    }
}

fn accept<T>(text: &str, command: &str, parse: fn(&Tree) -> Result<T>) -> Option<T> {
    if text.is_empty() {
        return None;
    }
    let checked = decode(text).and_then(|env| {
        env.expect_command(command)?;
        parse(&env.tree)
    });
    match checked {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(command, error = %err, "ignoring relay content");
            None
        }
    }
}

/// Decode a continuation that must carry `command`.
fn continuation(text: &str, command: &str) -> Result<Tree> {
    let env = decode(text)?;
    env.expect_command(command)?;
    Ok(env.tree)
}

fn envelope(command: &str, tree: Tree) -> Result<String> {
    Envelope::new(command, tree).encode()
}
