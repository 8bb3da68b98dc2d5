//! Bounded retry for connection-level failures.
//!
//! Only failures where the request never reached the provider are retried
//! (connection refused, DNS). Anything the provider actually answered, and any
//! timeout, is returned to the caller on the first attempt.

use std::future::Future;
use std::time::Duration;

/// Retry limits for one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed delay before each retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(250))
    }
}

/// Whether an error means the request never reached the other side.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

impl IsTransient for reqwest::Error {
    fn is_transient(&self) -> bool {
        self.is_connect() && !self.is_timeout()
    }
}

/// Run `send` until it succeeds, fails permanently, or the policy is exhausted.
pub async fn retry_transient<T, E, F, Fut>(policy: RetryPolicy, mut send: F) -> Result<T, E>
where
    E: IsTransient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match send().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    error = %err,
                    attempt,
                    max_retries = policy.max_retries,
                    "Connection to provider failed, retrying"
                );
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}
