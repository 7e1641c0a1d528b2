//! Fixed-delay retries for pulls and pushes
//!
//! Every attempt runs to completion before the next one starts, with a
//! constant pause in between. Image pull, image push and chart push each get
//! their own [`RetryPolicy`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// How many times to try, and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first (0 behaves like 1)
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::image_pull()
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    pub const fn image_pull() -> Self {
        Self::new(3, Duration::from_secs(5))
    }

    pub const fn image_push() -> Self {
        Self::new(3, Duration::from_secs(5))
    }

    pub const fn chart_push() -> Self {
        Self::new(5, Duration::from_secs(10))
    }

    /// No pause between attempts
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `operation` until it succeeds or the attempts run out
    ///
    /// The closure receives the 1-based attempt number. `label` only shows up
    /// in logs.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = self.attempts();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        label,
                        attempt,
                        max_attempts,
                        error = %e,
                        "attempt failed, retrying in {:?}",
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(label, attempts = attempt, error = %e, "all attempts failed");
                    return Err(Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
            }
        }
    }
}

/// Every attempt failed; carries the last error
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E> Exhausted<E> {
    pub fn into_last(self) -> E {
        self.last
    }
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempts)", self.last, self.attempts)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Exhausted<E> {}
