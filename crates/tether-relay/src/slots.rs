//! Durable relay slots
//!
//! Named values that outlive a single phase: the LOGIN `STATE`, the
//! `INSTALLATION` record and the Trio. Each slot has one writer per
//! phase; the store itself does no locking across processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::debug;

use crate::{RelayError, Result};

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// `None` if the slot was never written or has been cleared.
    async fn read(&self, name: &str) -> Result<Option<String>>;

    async fn write(&self, name: &str, value: &str) -> Result<()>;

    async fn clear(&self, name: &str) -> Result<()>;
}

/// Slot names are environment-variable style: `[A-Z0-9_]+`.
pub fn check_slot_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(RelayError::InvalidInput {
            field: "slot name".to_string(),
            reason: format!("{name:?} is not of the form [A-Z0-9_]+"),
        })
    }
}

/// Opens the slot store a given owner token may write. Lets a phase that
/// has just minted a token write with it instead of the one it started
/// with.
pub trait SlotAccess: Send + Sync {
    fn for_token(&self, token: &SecretString) -> Result<Arc<dyn SlotStore>>;
}

/// One store for every token, for development and tests.
#[derive(Clone)]
pub struct SharedSlotAccess {
    store: Arc<dyn SlotStore>,
}

impl SharedSlotAccess {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }
}

impl SlotAccess for SharedSlotAccess {
    fn for_token(&self, _token: &SecretString) -> Result<Arc<dyn SlotStore>> {
        Ok(self.store.clone())
    }
}

fn poisoned() -> RelayError {
    RelayError::InvalidInput {
        field: "slot store".to_string(),
        reason: "lock poisoned".to_string(),
    }
}

#[derive(Debug, Default)]
pub struct MemorySlots {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SlotStore for MemorySlots {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        check_slot_name(name)?;
        Ok(self.values.lock().map_err(|_| poisoned())?.get(name).cloned())
    }

    async fn write(&self, name: &str, value: &str) -> Result<()> {
        check_slot_name(name)?;
        self.values
            .lock()
            .map_err(|_| poisoned())?
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<()> {
        check_slot_name(name)?;
        self.values.lock().map_err(|_| poisoned())?.remove(name);
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RelayError {
    RelayError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Slots kept as `NAME="value"` lines of a development `.env` file.
///
/// Writes rewrite the whole file, keeping other entries in place.
#[derive(Debug)]
pub struct DotenvSlots {
    path: PathBuf,
    guard: tokio::sync::Mutex<()>,
}

impl DotenvSlots {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: tokio::sync::Mutex::new(()),
        }
    }

    async fn load_entries(&self) -> Result<Vec<(String, String)>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(parse_dotenv(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn store_entries(&self, entries: &[(String, String)]) -> Result<()> {
        let text = render_dotenv(entries);
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        debug!(path = %self.path.display(), entries = entries.len(), "wrote .env");
        Ok(())
    }
}

#[async_trait]
impl SlotStore for DotenvSlots {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        check_slot_name(name)?;
        let _held = self.guard.lock().await;
        let entries = self.load_entries().await?;
        Ok(entries.into_iter().find(|(k, _)| k == name).map(|(_, v)| v))
    }

    async fn write(&self, name: &str, value: &str) -> Result<()> {
        check_slot_name(name)?;
        let _held = self.guard.lock().await;
        let mut entries = self.load_entries().await?;
        match entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => entries.push((name.to_string(), value.to_string())),
        }
        self.store_entries(&entries).await
    }

    async fn clear(&self, name: &str) -> Result<()> {
        check_slot_name(name)?;
        let _held = self.guard.lock().await;
        let mut entries = self.load_entries().await?;
        let before = entries.len();
        entries.retain(|(k, _)| k != name);
        if entries.len() == before {
            return Ok(());
        }
        self.store_entries(&entries).await
    }
}

/// Parse `NAME=value` / `NAME="value"` lines. Blank lines and `#`
/// comments are skipped; double-quoted values understand `\"`, `\\`
/// and `\n`.
pub fn parse_dotenv(text: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_start_matches("export ").trim();
        let raw = raw.trim();
        let value = match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            Some(inner) => unescape(inner),
            None => raw.to_string(),
        };
        entries.push((key.to_string(), value));
    }
    entries
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

pub fn render_dotenv(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(k, v)| {
            let escaped = v
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n");
            format!("{k}=\"{escaped}\"")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
