use std::time::Duration;

use tracing::warn;

use crate::{error::Operation, ApiError, ApiResult};

/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Retry policy applied to every remote call.
///
/// Only transient failures (see [`ApiError::is_transient`]) are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    num_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(num_retries: u32, base_delay: Duration) -> Self {
        Self {
            num_retries,
            base_delay,
            max_delay: MAX_BACKOFF,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn num_retries(&self) -> u32 {
        self.num_retries
    }

    /// Delay before retry number `attempt` (0-based): 1x, 2x, 4x, ... the
    /// base delay, capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails permanently, or runs out of
    /// retries. On failure, returns the last error and the number of
    /// attempts made.
    pub fn run<T, F>(&self, operation: Operation, key: &str, mut call: F) -> Result<T, (ApiError, u32)>
    where
        F: FnMut() -> ApiResult<T>,
    {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.num_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        op = %operation,
                        key = %key,
                        attempt = attempt + 1,
                        max_retries = self.num_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient error, retrying: {}",
                        err
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err((err, attempt + 1)),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_success_on_first_attempt() {
        let calls = Cell::new(0);
        let result = RetryPolicy::new(3, Duration::ZERO).run(Operation::Open, "k", || {
            calls.set(calls.get() + 1);
            Ok::<_, ApiError>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_success_after_transient_failures() {
        let calls = Cell::new(0);
        let result = RetryPolicy::new(5, Duration::ZERO).run(Operation::Open, "k", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ApiError::status(503, "unavailable"))
            } else {
                Ok(100)
            }
        });
        assert_eq!(result.unwrap(), 100);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let result = RetryPolicy::new(5, Duration::ZERO).run(Operation::Save, "k", || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ApiError::status(403, "forbidden"))
        });
        let (err, attempts) = result.unwrap_err();
        assert_eq!(err.status_code(), Some(403));
        assert_eq!(attempts, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retries_exhausted() {
        let calls = Cell::new(0);
        let result = RetryPolicy::new(3, Duration::ZERO).run(Operation::Save, "k", || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ApiError::status(500, "boom"))
        });
        let (_, attempts) = result.unwrap_err();
        assert_eq!(attempts, 4);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }
}
