//! Fixed-interval polling against a remote resource state.

use anyhow::{bail, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::{DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS};

/// Poll cadence: how often to check and how many times before giving up.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

/// Run `check` until it yields a value or the attempt budget runs out.
///
/// `check` returns `Ok(Some(value))` when the resource is ready, `Ok(None)`
/// to poll again after `interval`, and `Err` to abort immediately. There is
/// no cancellation; the caller's process must be killed to stop an
/// in-progress wait.
pub async fn wait_until<F, Fut, T>(policy: &WaitPolicy, what: &str, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = check().await? {
            debug!(what, attempt, "ready");
            return Ok(value);
        }
        if attempt < policy.max_attempts {
            debug!(what, attempt, "not ready, polling again");
            tokio::time::sleep(policy.interval).await;
        }
    }
    bail!(
        "timed out waiting for {what} after {} attempts at {:?} intervals",
        policy.max_attempts,
        policy.interval
    )
}
