//! Tether CLI - one handshake phase per invocation
//!
//! Usage:
//!   tether login open <RELAY>           - answer a client's first message
//!   tether login close <RELAY> [--continuation TEXT]
//!   tether setup pub                    - open a secure public channel
//!   tether setup app <CONTINUATION>     - create the GitHub App
//!   tether setup token <CONTINUATION>   - mint the installation token
//!   tether dev open|close|inbox         - development mailbox phases

mod output;
mod runtime;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tether_core::retry::DEFAULT_DELAY_SECS;
use tether_core::{Orchestrator, PhaseRequest, RetryPolicy, Settings};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tether")]
#[command(author = "HeyBattle1")]
#[command(version)]
#[command(about = "Password-authenticated handshakes over an untrusted text relay", long_about = None)]
struct Cli {
    /// Seconds between relay reads
    #[arg(long, global = true, default_value_t = DEFAULT_DELAY_SECS)]
    delay: u64,

    /// Where to write the phase artifacts
    #[arg(long, global = true, default_value = output::SECRET_FILE)]
    out: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Operator login against the service identity
    Login {
        #[command(subcommand)]
        action: LoginAction,
    },

    /// Bootstrap the GitHub App and its installation token
    Setup {
        #[command(subcommand)]
        action: SetupAction,
    },

    /// Development phases over tmp-dev/dev.txt
    Dev {
        #[command(subcommand)]
        action: DevAction,
    },
}

#[derive(Subcommand)]
enum LoginAction {
    Open {
        /// The client's `op:pake__client_auth_data` envelope
        relay: String,
    },
    Close {
        /// The client's `op:pake__client_auth_result` envelope
        relay: String,

        /// OPEN's second artifact
        #[arg(long)]
        continuation: Option<String>,
    },
}

#[derive(Subcommand)]
enum SetupAction {
    Pub,
    App {
        /// PUB's second artifact
        continuation: String,
    },
    Token {
        /// APP's second artifact
        continuation: String,
    },
}

#[derive(Subcommand)]
enum DevAction {
    Open,
    Close,
    Inbox,
}

impl Commands {
    fn into_request(self) -> PhaseRequest {
        match self {
            Commands::Login { action } => match action {
                LoginAction::Open { relay } => PhaseRequest::LoginOpen { relay },
                LoginAction::Close {
                    relay,
                    continuation,
                } => PhaseRequest::LoginClose {
                    relay,
                    continuation,
                },
            },
            Commands::Setup { action } => match action {
                SetupAction::Pub => PhaseRequest::SetupPub,
                SetupAction::App { continuation } => PhaseRequest::SetupApp { continuation },
                SetupAction::Token { continuation } => PhaseRequest::SetupToken { continuation },
            },
            Commands::Dev { action } => match action {
                DevAction::Open => PhaseRequest::DevOpen,
                DevAction::Close => PhaseRequest::DevClose,
                DevAction::Inbox => PhaseRequest::DevInbox,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let request = cli.command.into_request();
    let phase = request.phase();

    let root = runtime::workspace_root()?;
    let (vars, config) = match runtime::load_vars(&root) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!(%phase, error = %err, "configuration failed");
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let wired = match runtime::build(&config, &root, phase) {
        Ok(wired) => wired,
        Err(err) => {
            error!(%phase, error = %err, "setup of collaborators failed");
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let settings = Settings::from_config(&config, RetryPolicy::from_delay_secs(cli.delay));
    let orchestrator = Orchestrator::new(wired.services, settings);

    match orchestrator.run(request).await {
        Ok(artifacts) => {
            output::write_artifacts(&cli.out, &artifacts).await?;
            if let Some(dotenv) = &wired.dotenv {
                runtime::write_back(dotenv, &vars).await?;
            }
            println!("{}", phase.success_message());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!(%phase, error = %err, "{}", err.public_message());
            eprintln!("{}", phase.failure_message(&err));
            Ok(ExitCode::FAILURE)
        }
    }
}
