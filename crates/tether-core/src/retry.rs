//! Polling budget for relay reads
//!
//! Every wait in a workflow shares one rule: sleep one interval, read,
//! repeat, and give up after a fixed fifteen minutes.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{HandshakeError, Result};

/// Overall wait ceiling in seconds.
pub const TIMEOUT_SECS: u64 = 15 * 60;

/// Default polling interval in seconds.
pub const DEFAULT_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_tries: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_tries: u32) -> Self {
        Self {
            interval,
            max_tries,
        }
    }

    /// `interval = delay` seconds and `max_tries = ceil(900 / delay)`.
    /// A zero delay is treated as one second.
    pub fn from_delay_secs(delay: u64) -> Self {
        let delay = delay.max(1);
        let tries = TIMEOUT_SECS.div_ceil(delay);
        Self {
            interval: Duration::from_secs(delay),
            max_tries: u32::try_from(tries).unwrap_or(u32::MAX),
        }
    }

    /// Sleep, then call `read`, until it yields a value.
    ///
    /// `Ok(None)` means "not there yet" and costs one try. Errors are not
    /// retried. After `max_tries` empty reads the loop fails with
    /// `Timeout`.
    pub async fn poll<T, F, Fut>(&self, waiting_for: &'static str, mut read: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for attempt in 1..=self.max_tries {
            tokio::time::sleep(self.interval).await;
            if let Some(value) = read().await? {
                debug!(waiting_for, attempt, "relay value arrived");
                return Ok(value);
            }
            debug!(waiting_for, attempt, max_tries = self.max_tries, "not ready");
        }
        Err(HandshakeError::Timeout {
            tries: self.max_tries,
            waiting_for,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_delay_secs(DEFAULT_DELAY_SECS)
    }
}
