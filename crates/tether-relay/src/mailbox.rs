//! Relay mailbox backends
//!
//! A mailbox is one shared text slot. Reads never fail: an empty,
//! missing or unreachable slot reads as `""`, and the caller keeps
//! polling. Newlines are stripped from everything read, so a pasted
//! envelope may be wrapped by whatever tool carried it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::{RelayError, Result};

/// Directory and file name of the development mailbox.
pub const DEV_DIR: &str = "tmp-dev";
pub const DEV_FILE: &str = "dev.txt";

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Current slot text with newlines removed, `""` if absent.
    async fn read(&self) -> String;

    /// Overwrite the slot.
    async fn write(&self, text: &str) -> Result<()>;
}

pub(crate) fn strip_newlines(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

/// File-backed mailbox used during development.
#[derive(Debug, Clone)]
pub struct LocalMailbox {
    path: PathBuf,
}

impl LocalMailbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `tmp-dev/dev.txt` under `root`.
    pub fn dev(root: &Path) -> Self {
        Self::new(root.join(DEV_DIR).join(DEV_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Mailbox for LocalMailbox {
    async fn read(&self) -> String {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => strip_newlines(&text),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "mailbox file unreadable");
                String::new()
            }
        }
    }

    async fn write(&self, text: &str) -> Result<()> {
        let io_err = |source| RelayError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&self.path, text).await.map_err(io_err)
    }
}

/// In-process mailbox. Can be scripted with a queue of texts that are
/// handed out one per read before settling on the last written value.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    current: Mutex<String>,
    script: Mutex<VecDeque<String>>,
    reads: AtomicU32,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        let mailbox = Self::new();
        if let Ok(mut current) = mailbox.current.lock() {
            *current = text.into();
        }
        mailbox
    }

    /// Hand out `texts` in order, one per read, then the current value.
    pub fn scripted<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mailbox = Self::new();
        if let Ok(mut script) = mailbox.script.lock() {
            script.extend(texts.into_iter().map(Into::into));
        }
        mailbox
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn read(&self) -> String {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            return strip_newlines(&next);
        }
        self.current
            .lock()
            .map(|c| strip_newlines(&c))
            .unwrap_or_default()
    }

    async fn write(&self, text: &str) -> Result<()> {
        let mut current = self.current.lock().map_err(|_| RelayError::InvalidInput {
            field: "mailbox".to_string(),
            reason: "lock poisoned".to_string(),
        })?;
        *current = text.to_string();
        Ok(())
    }
}

/// A mailbox whose content was injected through one environment
/// variable (for example `MAIL__TABLE`). Read-only.
#[derive(Debug, Clone)]
pub struct EnvMailbox {
    name: String,
    value: String,
}

impl EnvMailbox {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value: value.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Mailbox for EnvMailbox {
    async fn read(&self) -> String {
        strip_newlines(&self.value)
    }

    async fn write(&self, _text: &str) -> Result<()> {
        Err(RelayError::ReadOnly(self.name.clone()))
    }
}
