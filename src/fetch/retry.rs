//! One retry loop shared by every network call site.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::FetchError;

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

/// How a call site wants failures classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Retry server errors and transport failures.
    #[default]
    Standard,
    /// Give up on the first server error so the caller can try another URL.
    /// Transport failures still use the retry budget.
    FailFast,
}

impl FetchMode {
    /// Whether `error` should consume another attempt under this mode.
    ///
    /// Everything that is not retriable is terminal for the call.
    #[must_use]
    pub fn is_retriable(self, error: &FetchError) -> bool {
        match error {
            FetchError::Transport { .. } => true,
            FetchError::ServerError { .. } => self == Self::Standard,
            _ => false,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds, fails terminally, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. A retriable error on the last
    /// attempt is returned wrapped in [`FetchError::Exhausted`].
    ///
    /// # Errors
    ///
    /// Returns the terminal error, or `Exhausted` with the last retriable one.
    pub async fn run<T, F, Fut, P>(&self, label: &str, retriable: P, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        P: Fn(&FetchError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retriable(&e) => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        url = %label,
                        attempt,
                        max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        "Retriable failure: {e}"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
