/// Retry strategies with exponential backoff and jitter
///
/// Used by the driver around `Client::connect`. Library operations never
/// retry internally; a rejected command is reported as is.
use super::classification::{ErrorClass, ErrorClassifier};
use super::DeviceResult;
use std::time::Duration;

pub trait RetryStrategy {
    /// Determine if retry should be attempted
    fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool;

    /// Calculate delay before next retry
    fn next_delay(&self, attempt: u32) -> Duration;

    fn max_attempts(&self) -> u32;
}

/// Exponential backoff: delay = base * 2^attempt, capped, with random jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    /// 0.0 - 1.0
    jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter_factor: 0.3,
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Preset for reconnecting to a device daemon that may be restarting
    pub fn connect(max_attempts: u32) -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), max_attempts)
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential_ms = self
            .base_delay
            .as_millis()
            .saturating_mul(2_u128.saturating_pow(attempt));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis());

        let jitter_range = capped_ms as f64 * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_ms = (capped_ms as f64 + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool {
        attempt < self.max_attempts && class.allows_retry()
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        self.calculate_delay(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn should_retry(&self, _attempt: u32, _class: ErrorClass) -> bool {
        false
    }

    fn next_delay(&self, _attempt: u32) -> Duration {
        Duration::from_secs(0)
    }

    fn max_attempts(&self) -> u32 {
        0
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or the
/// strategy gives up. `sleep` is injected so callers and tests control time.
pub fn retry<T, F, S>(
    strategy: &dyn RetryStrategy,
    mut sleep: S,
    mut operation: F,
) -> DeviceResult<T>
where
    F: FnMut() -> DeviceResult<T>,
    S: FnMut(Duration),
{
    let classifier = ErrorClassifier::new();
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classifier.classify(&err);
                if !strategy.should_retry(attempt, class) {
                    return Err(err);
                }
                let delay = strategy.next_delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = strategy.max_attempts(),
                    class = %class,
                    "{}; retrying in {}",
                    err,
                    humantime::format_duration(delay)
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}
