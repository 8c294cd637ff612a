use conductor_core::{ConductorError, ConductorResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for transport-level retries with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt before the endpoint is declared unreachable.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// Spread `ms` uniformly over `[ms/2, ms]` so concurrent pollers drift apart.
pub fn jitter(ms: u64) -> u64 {
    if ms < 2 {
        return ms;
    }
    rand::thread_rng().gen_range(ms / 2..=ms)
}

/// Run `op`, retrying transient failures per `policy`.
///
/// Only errors for which [`ConductorError::is_retryable`] holds are retried;
/// anything else is returned immediately. Once the retries are spent the
/// last transient error is wrapped in [`ConductorError::Unreachable`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    endpoint: &str,
    operation: &str,
    op: F,
) -> ConductorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConductorResult<T>>,
{
    with_retry_if(policy, endpoint, operation, ConductorError::is_retryable, op).await
}

/// Like [`with_retry`], but only errors accepted by `retryable` are retried.
///
/// Calls that are not safe to repeat pass [`ConductorError::is_undelivered`]
/// so a request the endpoint may have seen is never sent twice.
pub async fn with_retry_if<T, F, Fut>(
    policy: &RetryPolicy,
    endpoint: &str,
    operation: &str,
    retryable: fn(&ConductorError) -> bool,
    mut op: F,
) -> ConductorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConductorResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) => {
                if attempt >= policy.max_retries {
                    warn!(
                        endpoint = %endpoint,
                        operation = %operation,
                        attempts = attempt + 1,
                        error = %e,
                        "Retries exhausted, endpoint unreachable"
                    );
                    return Err(ConductorError::Unreachable {
                        endpoint: endpoint.to_string(),
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
                let delay = jitter(compute_backoff(policy, attempt));
                info!(
                    endpoint = %endpoint,
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %e,
                    "Transient transport error, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
