//! Retry with exponential backoff and jitter.
//!
//! Delay after failed attempt `n` (0-based) is `2^n s` plus up to one second
//! of jitter, capped at [`MAX_RETRY_DELAY`]. After `max_attempts` guarded
//! failures one last attempt runs and its result is returned as is.
//! Cancellation stops the loop during a sleep or an attempt.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::constants::{MAX_RETRY_DELAY, RETRY_JITTER_MS};
use crate::error::ChatError;
use crate::logging::Logger;

/// Backoff delay after failed attempt `attempt` (0-based), without jitter.
#[must_use]
pub fn base_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_RETRY_DELAY)
}

/// Backoff delay after failed attempt `attempt` (0-based), with jitter.
#[must_use]
pub fn delay_for(attempt: u32) -> Duration {
    let jitter = Duration::from_millis(rand::random::<u64>() % RETRY_JITTER_MS);
    (base_delay(attempt) + jitter).min(MAX_RETRY_DELAY)
}

/// Runs fallible async operations with backoff.
#[derive(Debug, Clone)]
pub struct Retry {
    max_attempts: u32,
    cancel: CancellationToken,
    logger: Logger,
}

impl Retry {
    /// `max_attempts` guarded attempts before the final one.
    #[must_use]
    pub fn new(max_attempts: u32, cancel: CancellationToken, logger: Logger) -> Self {
        Self {
            max_attempts,
            cancel,
            logger,
        }
    }

    /// Logger the retry loop reports to.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Run `operation` until it succeeds, the attempts are used up or the
    /// token is cancelled.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ChatError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ChatError> + std::fmt::Display,
    {
        for attempt in 0..self.max_attempts {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ChatError::Cancelled),
                result = operation(attempt) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let wait = delay_for(attempt);
            self.logger.warn(format_args!(
                "[Retry] Attempt {}/{} failed: {err}; retrying in {:.1}s",
                attempt + 1,
                self.max_attempts + 1,
                wait.as_secs_f32()
            ));

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ChatError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ChatError::Cancelled),
            result = operation(self.max_attempts) => result.map_err(Into::into),
        }
    }
}

/// Shorthand for [`Retry::run`] with the default logger and a token that is
/// never cancelled.
pub async fn retrying<T, E, F, Fut>(max_attempts: u32, operation: F) -> Result<T, ChatError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ChatError> + std::fmt::Display,
{
    Retry::new(
        max_attempts,
        CancellationToken::new(),
        crate::logging::default_logger(),
    )
    .run(operation)
    .await
}
