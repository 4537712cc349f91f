//! Bounded retry with exponential backoff and jitter.
//!
//! Every remote call (search, buy, auth refresh) goes through a
//! [`RetryingCallExecutor`]. Search and buy use the same executor type with
//! different policies: searches get a larger attempt budget, buys a small one
//! so a possibly-filled listing is not hammered.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::venue::VenueError;

const DEFAULT_SEARCH_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BUY_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 5000;
const DEFAULT_JITTER_MS: u64 = 400;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 8000;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Attempt budget from a raw env value; out-of-range values fall back to
/// `default` instead of wrapping.
fn attempts_or(raw: Option<u64>, default: u32) -> u32 {
    raw.and_then(|n| u32::try_from(n).ok())
        .filter(|&n| n > 0 && n <= 10) // Safety: cap at 10
        .unwrap_or(default)
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial try)
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Cap for the exponential part of the delay
    pub max_delay_ms: u64,
    /// Uniform jitter window added on top of the backoff
    pub jitter_ms: u64,
    /// Per-attempt timeout; exceeding it counts as a retryable failure
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SEARCH_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_ms: DEFAULT_JITTER_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl RetryPolicy {
    /// Shared backoff settings from the environment, with `max_attempts`
    /// read from `attempts_var`.
    fn from_env_with(attempts_var: &str, default_attempts: u32) -> Self {
        Self {
            max_attempts: attempts_or(env_u64(attempts_var), default_attempts),
            base_delay_ms: env_u64("RETRY_BASE_DELAY_MS")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_BASE_DELAY_MS),
            max_delay_ms: env_u64("RETRY_MAX_DELAY_MS")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_DELAY_MS),
            jitter_ms: env_u64("RETRY_JITTER_MS").unwrap_or(DEFAULT_JITTER_MS),
            call_timeout_ms: env_u64("CALL_TIMEOUT_MS")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_CALL_TIMEOUT_MS),
        }
    }

    /// Policy for search calls (`SEARCH_MAX_ATTEMPTS`, default 5).
    pub fn search_from_env() -> Self {
        Self::from_env_with("SEARCH_MAX_ATTEMPTS", DEFAULT_SEARCH_MAX_ATTEMPTS)
    }

    /// Policy for buy calls (`BUY_MAX_ATTEMPTS`, default 2).
    pub fn buy_from_env() -> Self {
        Self::from_env_with("BUY_MAX_ATTEMPTS", DEFAULT_BUY_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Deterministic part of the delay before retry number `attempt`:
    /// `min(max_delay, base_delay * 2^(attempt-1))`.
    pub fn exponential_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let multiplier = if exponent >= 32 {
            // Avoid overflow: 2^32 would overflow u64 after the multiply
            u64::MAX
        } else {
            1u64 << exponent
        };
        self.base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms)
    }

    /// Full delay: exponential part plus uniform jitter in `[0, jitter_ms)`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        };
        self.exponential_ms(attempt).saturating_add(jitter)
    }

    /// Delay with a caller-supplied jitter function (for testing)
    #[cfg(test)]
    pub fn backoff_ms_with_jitter(&self, attempt: u32, jitter_fn: impl Fn(u64) -> u64) -> u64 {
        self.exponential_ms(attempt) + jitter_fn(self.jitter_ms)
    }
}

/// A call that did not succeed, carrying the last error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op} gave up after {attempts} attempt(s): {last_error}")]
pub struct CallFailure {
    pub op: String,
    pub attempts: u32,
    pub last_error: VenueError,
}

impl CallFailure {
    /// True when the failure was not worth retrying (e.g. listing gone).
    pub fn is_rejection(&self) -> bool {
        !self.last_error.is_retryable()
    }
}

/// Wraps single remote calls with bounded retries and backoff.
#[derive(Debug, Clone)]
pub struct RetryingCallExecutor {
    policy: RetryPolicy,
}

impl RetryingCallExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, a non-retryable error is returned,
    /// or attempts are exhausted. Each attempt is bounded by the policy's
    /// call timeout; a timeout counts as a retryable failure.
    ///
    /// # Arguments
    /// * `op_name` - Operation name for logging (e.g., "search:toy bear")
    /// * `operation` - Closure producing one attempt of the remote call
    pub async fn execute<T, Fut, F>(&self, op_name: &str, mut operation: F) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let start = Instant::now();
        let timeout = Duration::from_millis(self.policy.call_timeout_ms);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(VenueError::Timeout(self.policy.call_timeout_ms)),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "retry op={} succeeded after {} attempts (elapsed={}ms)",
                            op_name,
                            attempt,
                            start.elapsed().as_millis()
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!("retry op={} non-retryable error: {}", op_name, err);
                return Err(CallFailure {
                    op: op_name.to_string(),
                    attempts: attempt,
                    last_error: err,
                });
            }

            if attempt >= max_attempts {
                warn!(
                    "retry op={} failed after {} attempts (elapsed={}ms): {}",
                    op_name,
                    attempt,
                    start.elapsed().as_millis(),
                    err
                );
                return Err(CallFailure {
                    op: op_name.to_string(),
                    attempts: attempt,
                    last_error: err,
                });
            }

            let backoff_ms = self.policy.backoff_ms(attempt);
            debug!(
                "retry op={} attempt={} backoff_ms={} reason={}",
                op_name, attempt, backoff_ms, err
            );
            if backoff_ms > 0 {
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            attempt += 1;
        }
    }
}
