//! Resilience utilities: retry logic and backoff schedules.
//!
//! The replication drain task uses [`RetryConfig`] to pace mirror apply
//! attempts: exponential backoff between attempts, capped at a ceiling,
//! bounded by a retry budget after which the record is abandoned.
//!
//! # Example
//!
//! ```rust
//! use named_count::resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let retry = RetryConfig::default();
//! assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
//! assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
//! ```

use std::time::Duration;

/// Configuration for mirror apply retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of apply attempts before giving up.
    /// Set to `usize::MAX` for infinite retries.
    pub max_attempts: usize,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Infinite retry for long-running daemon deployments where the mirror
    /// must eventually catch up (never give up!).
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay     Reasoning
    /// -------  -----     ---------
    /// 1        1s        Immediate transient retry
    /// 2        2s        Brief network blip
    /// 3        4s        DNS propagation
    /// 4        8s        Container restart
    /// 5        16s       Service recovery
    /// 6        32s       Load balancer failover
    /// 7+       300s cap  Extended outage, retry forever
    /// ```
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = Duration::from_secs_f64(delay_secs);

        std::cmp::min(delay, self.max_delay)
    }

    /// Check if the budget allows another attempt after `attempts` tries.
    pub fn allows_attempt(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }
}
