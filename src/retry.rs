//! Retry utilities with exponential backoff and jitter.
//!
//! Two flavours live here:
//!
//! - [`retry_with_backoff`] / [`retry_with_backoff_if`] retry an async operation
//!   in place (used for optimistic-concurrency conflicts and one-shot CLI calls).
//! - [`RequeueBackoff`] hands out requeue delays to reconcilers so that every
//!   "not yet" or "failed" outcome backs off the same way, per object.
//!
//! # Example
//!
//! ```ignore
//! use ktcloud_operator::retry::{retry_with_backoff, RetryConfig};
//!
//! let token = retry_with_backoff(
//!     &RetryConfig::with_max_attempts(3),
//!     "authenticate",
//!     || async { cloud.authenticate(&identity).await },
//! ).await?;
//! ```

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, error, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Short, bounded retries for re-read-and-write loops after a conflict
    pub fn conflict() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries every error until success or until `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(config, operation_name, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but only retries errors accepted by `should_retry`.
///
/// Any other error is returned immediately.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // Add jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Exponential requeue schedule shared by all reconcilers.
///
/// Attempts are unbounded; only the delay is capped.
#[derive(Clone, Debug, PartialEq)]
pub struct RequeuePolicy {
    /// Delay returned for the first consecutive failure
    pub initial: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Growth factor between consecutive failures
    pub multiplier: f64,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(60),
            max: Duration::from_secs(600),
            multiplier: 2.0,
        }
    }
}

impl RequeuePolicy {
    /// Delay for the given zero-based consecutive failure count
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = self.multiplier.powi(failures.min(32) as i32);
        let secs = (self.initial.as_secs_f64() * factor).min(self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Per-object consecutive failure tracking for [`RequeuePolicy`].
///
/// Keys are opaque strings (the controllers use `kind/namespace/name`).
#[derive(Debug, Default)]
pub struct RequeueBackoff {
    policy: RequeuePolicy,
    failures: DashMap<String, u32>,
}

impl RequeueBackoff {
    /// Create a tracker using the given policy
    pub fn new(policy: RequeuePolicy) -> Self {
        Self {
            policy,
            failures: DashMap::new(),
        }
    }

    /// Record another unsuccessful pass for `key` and return how long to wait
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut entry = self.failures.entry(key.to_string()).or_insert(0);
        let delay = self.policy.delay_for(*entry);
        *entry = entry.saturating_add(1);
        debug!(key = %key, failures = *entry, delay_secs = delay.as_secs(), "backing off");
        delay
    }

    /// Forget the failure history for `key` after it made progress
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// The policy this tracker applies
    pub fn policy(&self) -> &RequeuePolicy {
        &self.policy
    }
}
