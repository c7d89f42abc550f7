//! Exponential backoff for operations that talk to the outside world.
//!
//! Used for the one-time session setup of a worker (announcing the webhook)
//! where a transient network error should not leave a bot unserviced.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Retry strategy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (the first try is not counted)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Calculates delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // up to 25% jitter
            capped_delay + rand::random::<f64>() * 0.25 * capped_delay
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Session setup: a handful of attempts spread over about half a minute.
    pub fn session() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// Determines if an error is retryable.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionRefused
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }
}

impl Retryable for AppError {
    fn is_retryable(&self) -> bool {
        match self {
            AppError::Redis(err) => err.is_io_error() || err.is_timeout() || err.is_connection_dropped(),
            AppError::Io(err) => err.is_retryable(),
            AppError::Session(_) => true,
            AppError::Anyhow(err) => {
                let msg = err.to_string().to_lowercase();
                msg.contains("timeout") || msg.contains("connection") || msg.contains("network")
            }
            AppError::Json(_) | AppError::Config(_) | AppError::Handler(_) | AppError::Validation(_) => false,
        }
    }
}

/// Executes an async operation with retry logic.
///
/// Non-retryable errors are returned at once; retryable ones are retried up
/// to `config.max_retries` times and the last error is returned.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts <= config.max_retries && e.is_retryable() => {
                let delay = config.delay_for_attempt(attempts - 1);

                log::warn!(
                    "Attempt {}/{} failed (retrying in {:?}): {}",
                    attempts,
                    config.max_retries + 1,
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    log::error!("Giving up after {} attempts: {}", attempts, e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    fn counted<T>(
        counter: &Arc<AtomicU32>,
        outcome: impl Fn(u32) -> Result<T, AppError>,
    ) -> impl FnMut() -> std::future::Ready<Result<T, AppError>> {
        let counter = Arc::clone(counter);
        move || std::future::ready(outcome(counter.fetch_add(1, Ordering::SeqCst)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry(
            &fast(),
            counted(&calls, |n| {
                if n < 2 {
                    Err(AppError::Session("connection reset".to_string()))
                } else {
                    Ok(42)
                }
            }),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry(
            &fast(),
            counted(&calls, |_| Err::<(), _>(AppError::Validation("bad token".to_string()))),
        )
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry(
            &fast(),
            counted(&calls, |_| Err::<(), _>(AppError::Session("down".to_string()))),
        )
        .await;

        assert!(matches!(result, Err(AppError::Session(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            ..fast()
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_session_preset_jitters() {
        let config = RetryConfig::session();
        let delay = config.delay_for_attempt(0);
        assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_millis(2500));
    }
}
