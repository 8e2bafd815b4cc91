//! Bounded retry with exponential backoff for non-blocking channel opens.
//!
//! Opening a FIFO with `O_NONBLOCK` fails immediately (`ENXIO`) while the
//! peer end is absent. Instead of sleeping a fixed amount and hoping the peer
//! got there first, callers retry the open with a growing delay until the
//! peer shows up or the attempt budget runs out.

use serde::Deserialize;
use std::io;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Initial delay between retries.
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Maximum delay cap.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(200),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs.max(0.0))
    }

    /// Upper bound on the total time spent sleeping between attempts.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.calculate_delay(attempt))
            .sum()
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
}

/// Retry a blocking operation with exponential backoff.
///
/// Errors rejected by `should_retry` are returned immediately, as is the last
/// error once `max_attempts` is exhausted.
pub fn retry_blocking<T, F>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&io::Error) -> bool,
) -> (io::Result<T>, RetryStats)
where
    F: FnMut() -> io::Result<T>,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts.max(1);

    for attempt in 0..max_attempts {
        stats.attempts = attempt + 1;

        match operation() {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                if !should_retry(&e) || attempt + 1 >= max_attempts {
                    return (Err(e), stats);
                }

                let delay = config.calculate_delay(attempt);
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );
                stats.total_delay += delay;
                thread::sleep(delay);
            }
        }
    }

    unreachable!("retry loop always returns")
}

/// `ENXIO`: the other end of the FIFO is not open yet.
pub fn is_peer_absent(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENXIO)
}

/// Durations in config files are written as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[test]
    fn test_calculate_delay_doubles_and_caps() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(35));
        assert_eq!(config.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(20));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(35));
        assert_eq!(config.calculate_delay(30), Duration::from_millis(35));
    }

    #[test]
    fn test_total_budget() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100));
        assert_eq!(config.total_budget(), Duration::from_millis(30));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let (result, stats) = retry_blocking(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(io::Error::from_raw_os_error(libc::ENXIO))
                } else {
                    Ok(7)
                }
            },
            is_peer_absent,
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(stats.attempts, 3);
        assert!(stats.success);
    }

    #[test]
    fn test_non_retryable_error_returns_immediately() {
        let (result, stats): (io::Result<()>, _) = retry_blocking(
            &fast(),
            || Err(io::Error::from_raw_os_error(libc::EACCES)),
            is_peer_absent,
        );
        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::EACCES));
        assert_eq!(stats.attempts, 1);
        assert!(!stats.success);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let (result, stats): (io::Result<()>, _) = retry_blocking(
            &fast().with_max_attempts(4),
            || Err(io::Error::from_raw_os_error(libc::ENXIO)),
            is_peer_absent,
        );
        assert!(is_peer_absent(&result.unwrap_err()));
        assert_eq!(stats.attempts, 4);
    }
}
