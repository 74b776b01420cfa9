//! Backoff for acquiring worker fetch contexts
//!
//! A fetch context can fail to start while a browser or connection pool is
//! still coming up. Acquisition is retried on a [`Backoff`] schedule. Sink
//! writes and page fetches are never retried: a failed flush goes to backup,
//! a failed page is skipped and counted.
//!
//! # Example
//!
//! ```no_run
//! use listing_ingest::config::RetryConfig;
//! use listing_ingest::page::FetcherFactory;
//! use listing_ingest::retry::with_retry;
//!
//! # async fn example(factory: &dyn FetcherFactory) -> listing_ingest::Result<()> {
//! let fetcher = with_retry(&RetryConfig::default(), || factory.create(1)).await?;
//! fetcher.close().await;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Errors that may succeed when the operation is repeated
pub trait IsRetryable {
    /// Whether the failure is transient
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // A context that is not ready yet usually is a moment later
            Error::ResourceAcquisition { .. } => true,
            Error::Fetch { message, .. } => {
                message.contains("Timeout") || message.contains("Connection failed")
            }
            Error::Config { .. }
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::Backup { .. }
            | Error::State(_)
            | Error::Cancelled
            | Error::Other(_) => false,
        }
    }
}

/// Delay schedule for successive retries
///
/// Delays grow by `backoff_multiplier` up to `max_delay`. With jitter each
/// delay is stretched by a random factor in `[1, 2]`. The schedule ends
/// after `max_attempts` delays.
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
    remaining: u32,
}

impl Backoff {
    /// Schedule described by `config`
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay.min(config.max_delay),
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            remaining: config.max_attempts,
        }
    }

    /// Delay before the next retry, or `None` once retries are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next;
        self.next = base.mul_f64(self.multiplier).min(self.max);
        Some(if self.jitter { add_jitter(base) } else { base })
    }

    /// Retries left in the schedule
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Run `operation`, retrying transient failures on the configured backoff
///
/// The operation runs at most `max_attempts + 1` times. Returns the first
/// success, the first non-retryable error, or the last error once the
/// schedule is exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempt = 1u32;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::error!(error = %error, attempt, "Non-retryable failure");
            return Err(error);
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::error!(error = %error, attempts = attempt, "Retries exhausted");
            return Err(error);
        };

        tracing::warn!(
            error = %error,
            attempt,
            retries_left = backoff.remaining(),
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

// Result lies in [delay, 2 * delay]
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
