//! Environment configuration
//!
//! Built from a plain variable map so tests never touch the process
//! environment. The binary passes `std::env::vars()` (plus `.env` during
//! development).

use std::collections::BTreeMap;

use secrecy::SecretString;
use thiserror::Error;

pub const REMOTE: &str = "REMOTE";
pub const DEPLOYMENT: &str = "DEPLOYMENT";
pub const INSTALLATION: &str = "INSTALLATION";
pub const ROOT_PEPPER: &str = "ROOT_PEPPER";
pub const STATE: &str = "STATE";
pub const SESSION: &str = "SESSION";
pub const OLD_HASH: &str = "OLD_HASH";
pub const MAIL_TABLE: &str = "MAIL__TABLE";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";

/// Deployment name that selects development mode.
pub const DEVELOPMENT: &str = "DEVELOPMENT";

/// Variables written back to `.env` after a development run.
pub const TRACKED: [&str; 7] = [
    SESSION,
    ROOT_PEPPER,
    INSTALLATION,
    STATE,
    "SERVERS",
    "CLIENTS",
    "SECRETS",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid env: {0}")]
    Invalid(&'static str),

    #[error("Missing env: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub owner: String,
    pub repo: String,
    pub deployment: String,
    pub production: bool,
    pub root_pepper: Option<SecretString>,
    pub installation: Option<String>,
    pub session: Option<SecretString>,
    pub old_hash: Option<String>,
    pub mail_table: Option<String>,
    pub github_token: Option<SecretString>,
}

pub fn is_production(deployment: &str) -> bool {
    !deployment.eq_ignore_ascii_case(DEVELOPMENT)
}

fn non_empty(vars: &BTreeMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).filter(|v| !v.is_empty()).cloned()
}

impl Config {
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let remote = non_empty(vars, REMOTE).ok_or(ConfigError::Invalid(REMOTE))?;
        let (owner, repo) = match remote.split('/').collect::<Vec<_>>().as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
                (owner.to_string(), repo.to_string())
            }
            _ => return Err(ConfigError::Invalid(REMOTE)),
        };
        let deployment = non_empty(vars, DEPLOYMENT).ok_or(ConfigError::Invalid(DEPLOYMENT))?;

        Ok(Self {
            owner,
            repo,
            production: is_production(&deployment),
            deployment,
            root_pepper: non_empty(vars, ROOT_PEPPER).map(SecretString::new),
            installation: non_empty(vars, INSTALLATION),
            session: non_empty(vars, SESSION).map(SecretString::new),
            old_hash: non_empty(vars, OLD_HASH),
            mail_table: non_empty(vars, MAIL_TABLE),
            github_token: non_empty(vars, GITHUB_TOKEN).map(SecretString::new),
        })
    }
}
