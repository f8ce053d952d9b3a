//! Bounded retry with exponential backoff for vendor calls.

use std::future::Future;
use std::time::Duration;

use relay_types::{RelayError, Result};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// `2^attempt` seconds plus a fixed offset.
    Exponential { offset: Duration },
    /// `2^attempt` seconds plus uniform random jitter in `[0, max_jitter)`.
    ExponentialJitter { max_jitter: Duration },
    /// No delay between retries.
    None,
}

impl Backoff {
    /// Compute the delay after the failure of a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = Duration::from_secs(2u64.saturating_pow(attempt as u32));
        match self {
            Backoff::Exponential { offset } => base + *offset,
            Backoff::ExponentialJitter { max_jitter } => {
                base + max_jitter.mul_f64(rand::random::<f64>())
            }
            Backoff::None => Duration::ZERO,
        }
    }
}

/// Stateless retry policy; clone it freely and share it across concurrent calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// The shared adapter policy: 3 attempts, waiting `2^attempt + 0.1` seconds.
    pub fn standard() -> Self {
        Self::new(
            3,
            Backoff::Exponential {
                offset: Duration::from_millis(100),
            },
        )
    }

    /// The Gemini inner loop for internal server errors: 3 attempts, waiting
    /// `2^attempt` seconds plus up to one second of jitter.
    pub fn internal_error() -> Self {
        Self::new(
            3,
            Backoff::ExponentialJitter {
                max_jitter: Duration::from_secs(1),
            },
        )
    }

    /// Run `f`, retrying on any error.
    pub async fn retry<T, F, Fut>(&self, label: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_if(label, |_| true, f).await
    }

    /// Run `f`, retrying only errors accepted by `should_retry`.
    ///
    /// `f` is called at most `max_attempts` times. The error of the final
    /// attempt, or of the first rejected error, is returned unchanged.
    pub async fn retry_if<T, F, Fut, P>(&self, label: &str, should_retry: P, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&RelayError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts && should_retry(&e) => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation = %label,
                        attempt = attempt + 1,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
