/// Backoff for recurring background tasks
///
/// A recurring task reports each run as a success or a failure. Failures
/// double the delay before the next run up to a cap; a success restores the
/// normal interval. The task itself is never abandoned.

use std::time::Duration;
use tracing::warn;

/// Retry policy for a recurring task
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay between healthy runs
    pub interval: Duration,
    /// Delay after the first failure
    pub initial_retry_delay: Duration,
    /// Upper bound for the failure delay
    pub max_retry_delay: Duration,
}

impl BackoffConfig {
    pub fn new(interval: Duration, max_retry_delay: Duration) -> Self {
        Self {
            interval,
            initial_retry_delay: interval.min(max_retry_delay),
            max_retry_delay,
        }
    }
}

/// Failure tracking for one task
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current_retry_delay = config.initial_retry_delay;
        Self {
            config,
            consecutive_failures: 0,
            current_retry_delay,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next run after a failure
    pub fn record_failure(&mut self, task_name: &str) -> Duration {
        let delay = self.current_retry_delay;
        self.consecutive_failures += 1;
        // Exponential backoff with cap
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, self.config.max_retry_delay);

        warn!(
            "Task '{}' failed {} time(s) in a row, retrying in {:?}",
            task_name, self.consecutive_failures, delay
        );
        delay
    }

    /// Delay before the next run after a success
    pub fn record_success(&mut self, task_name: &str) -> Duration {
        if self.consecutive_failures > 0 {
            warn!(
                "Task '{}' recovered after {} failures",
                task_name, self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.current_retry_delay = self.config.initial_retry_delay;
        self.config.interval
    }
}
