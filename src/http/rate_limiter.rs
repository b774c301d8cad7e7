//! Per-host rate limiting and retry logic for indexer requests
//!
//! Every host gets its own GCRA gate so indexers sharing a site also share
//! its request budget. Retries are bounded and only happen here.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::IndexerError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Spacing gates keyed by host
#[derive(Default)]
pub struct HostRateLimiter {
    gates: Mutex<HashMap<String, (Duration, Arc<DirectLimiter>)>>,
}

impl HostRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a request to `key` may go out, at most one per `interval`
    pub async fn wait(&self, key: &str, interval: Duration) {
        if interval.is_zero() {
            return;
        }

        let limiter = self.gate(key, interval);
        limiter.until_ready().await;
    }

    fn gate(&self, key: &str, interval: Duration) -> Arc<DirectLimiter> {
        let mut gates = self.gates.lock();
        if let Some((current, limiter)) = gates.get(key) {
            if *current == interval {
                return limiter.clone();
            }
        }

        debug!(host = %key, interval_ms = interval.as_millis() as u64, "Creating rate limit gate");
        let quota = Quota::with_period(interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(quota));
        gates.insert(key.to_string(), (interval, limiter.clone()));
        limiter
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// A 429 asking for a longer wait than this is escalated instead of retried
    pub max_inline_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_inline_retry_after: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// How an error should be treated by [`retry_async`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    Fatal,
    Backoff,
    After(Duration),
}

pub trait Retryable {
    fn retry_hint(&self) -> RetryHint;
}

impl Retryable for IndexerError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            IndexerError::Transport { source, .. } if !source.is_builder() => RetryHint::Backoff,
            IndexerError::Http { status, .. } if *status == 408 || (500..600).contains(status) => {
                RetryHint::Backoff
            }
            IndexerError::RateLimited { retry_after, .. } => RetryHint::After(*retry_after),
            _ => RetryHint::Fatal,
        }
    }
}

/// Execute an async operation with retry logic
pub async fn retry_async<T, E, Fut, F>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let delay = match e.retry_hint() {
            RetryHint::Fatal => return Err(e),
            RetryHint::After(wait) if wait > config.max_inline_retry_after => {
                debug!(
                    operation = %operation_name,
                    retry_after_secs = wait.as_secs(),
                    "Retry-After too long to wait inline"
                );
                return Err(e);
            }
            RetryHint::After(wait) => Some(wait),
            RetryHint::Backoff => backoff.next_backoff(),
        };

        if attempts > config.max_retries {
            warn!(
                operation = %operation_name,
                attempts = attempts,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        let Some(duration) = delay else {
            return Err(e);
        };

        warn!(
            operation = %operation_name,
            attempt = attempts,
            error = %e,
            retry_in_ms = duration.as_millis() as u64,
            "Operation failed, retrying"
        );
        tokio::time::sleep(duration).await;
    }
}
