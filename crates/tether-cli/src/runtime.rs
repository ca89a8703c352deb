//! Wiring: environment loading and the collaborators for one run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tether_core::config::{ConfigError, GITHUB_TOKEN, INSTALLATION, MAIL_TABLE, TRACKED};
use tether_core::sealed::unseal;
use tether_core::shape::FromTree;
use tether_core::workflow::commands;
use tether_core::{
    decode, Config, InstallationRecord, SealedSlots, Services, SimulatedPake, WorkflowPhase,
};
use tether_relay::slots::parse_dotenv;
use tether_relay::{
    DotenvSlots, EnvMailbox, GithubApps, GithubClient, GithubSlots, LocalMailbox, Mailbox,
    RemoteMailbox, SharedSlotAccess, SlotStore,
};
use tracing::{debug, info, warn};

pub const DOTENV_FILE: &str = ".env";

/// Process environment overlaid on `.env`. The file only counts during
/// development.
pub fn load_vars(root: &Path) -> anyhow::Result<(BTreeMap<String, String>, Config)> {
    let process: BTreeMap<String, String> = std::env::vars().collect();
    let dotenv_path = root.join(DOTENV_FILE);

    let mut vars: BTreeMap<String, String> = match std::fs::read_to_string(&dotenv_path) {
        Ok(text) => parse_dotenv(&text).into_iter().collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {}", dotenv_path.display()));
        }
    };
    let from_file = vars.len();
    vars.extend(process.clone());

    let config = Config::from_vars(&vars)?;
    if config.production && from_file > 0 {
        warn!("ignoring {DOTENV_FILE} in production");
        let config = Config::from_vars(&process)?;
        return Ok((process, config));
    }
    debug!(from_file, production = config.production, "environment loaded");
    Ok((vars, config))
}

/// Owner token for the GitHub relay: the stored installation token if the
/// record opens, else `GITHUB_TOKEN`.
fn owner_token(config: &Config) -> Option<SecretString> {
    let recorded = match (&config.installation, &config.root_pepper) {
        (Some(stored), Some(pepper)) => {
            let record = unseal(stored, pepper).and_then(|text| {
                let env = decode(&text)?;
                env.expect_command(commands::INSTALLATION)?;
                InstallationRecord::from_tree(&env.tree)
            });
            match record {
                Ok(record) => Some(record.installed.token),
                Err(err) => {
                    warn!(error = %err, "unusable {INSTALLATION} record");
                    None
                }
            }
        }
        _ => None,
    };
    recorded.or_else(|| config.github_token.clone())
}

/// Phases that read the issue mailbox or write environment variables
/// with the owner token. SETUP TOKEN writes with the token it mints.
fn needs_owner_token(phase: WorkflowPhase) -> bool {
    matches!(
        phase,
        WorkflowPhase::LoginOpen | WorkflowPhase::LoginClose | WorkflowPhase::SetupApp
    )
}

pub struct Runtime {
    pub services: Services,
    /// Set during development, for the write-back.
    pub dotenv: Option<Arc<DotenvSlots>>,
}

pub fn build(config: &Config, root: &Path, phase: WorkflowPhase) -> anyhow::Result<Runtime> {
    let pake = Arc::new(SimulatedPake::new());
    let apps = Arc::new(GithubApps::new()?);

    if config.production {
        let token = match owner_token(config) {
            Some(token) => token,
            None if needs_owner_token(phase) => {
                return Err(ConfigError::Missing(GITHUB_TOKEN).into());
            }
            None => {
                debug!(%phase, "no owner token, none needed");
                SecretString::new(String::new())
            }
        };
        let client = GithubClient::new(&config.owner, &config.repo, token)?;
        let github_slots = Arc::new(GithubSlots::new(client.clone(), config.deployment.clone()));
        let store: Arc<dyn SlotStore> = github_slots.clone();
        let slots = match &config.root_pepper {
            Some(pepper) => SealedSlots::new(store, pepper.clone()),
            None => SealedSlots::plain(store),
        };
        info!(owner = %config.owner, repo = %config.repo, "using GitHub relay");
        return Ok(Runtime {
            services: Services {
                mailbox: Arc::new(RemoteMailbox::new(client)),
                inbox: Arc::new(EnvMailbox::new(MAIL_TABLE, config.mail_table.clone())),
                slots,
                owner_slots: github_slots,
                apps: apps.clone(),
                installs: apps,
                client: pake.clone(),
                server: pake,
            },
            dotenv: None,
        });
    }

    let mailbox = Arc::new(LocalMailbox::dev(root));
    let inbox: Arc<dyn Mailbox> = match &config.mail_table {
        Some(text) => Arc::new(EnvMailbox::new(MAIL_TABLE, Some(text.clone()))),
        None => mailbox.clone(),
    };
    let dotenv = Arc::new(DotenvSlots::new(root.join(DOTENV_FILE)));
    info!(mailbox = %mailbox.path().display(), "using development relay");
    Ok(Runtime {
        services: Services {
            mailbox,
            inbox,
            slots: SealedSlots::plain(dotenv.clone()),
            owner_slots: Arc::new(SharedSlotAccess::new(dotenv.clone())),
            apps: apps.clone(),
            installs: apps,
            client: pake.clone(),
            server: pake,
        },
        dotenv: Some(dotenv),
    })
}

/// Persist tracked variables that only came from the process environment,
/// so the next development run sees them. Slot writes made by the phase
/// are already in the file and win.
pub async fn write_back(
    dotenv: &DotenvSlots,
    vars: &BTreeMap<String, String>,
) -> anyhow::Result<()> {
    let mut written = 0;
    for name in TRACKED {
        let Some(value) = vars.get(name).filter(|v| !v.is_empty()) else {
            continue;
        };
        if dotenv.read(name).await?.is_none() {
            dotenv.write(name, value).await?;
            written += 1;
        }
    }
    debug!(written, "development variables written back");
    Ok(())
}

/// Current directory, the root of `tmp-dev/` and `.env`.
pub fn workspace_root() -> anyhow::Result<PathBuf> {
    std::env::current_dir().context("resolving the working directory")
}
