//! Ask-with-retry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use twinauth_core::{EnforcementError, Result};

/// How failed attempts are retried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// Single attempt, no retries
    Off,
    /// Retry immediately
    NoDelay,
    /// Retry after `fixed-delay-ms`
    FixedDelay,
    /// Retry with exponential backoff between `backoff-min-ms` and `backoff-max-ms`
    #[default]
    BackoffDelay,
}

/// `[ask-with-retry]` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AskWithRetryConfig {
    /// Timeout of a single attempt
    pub ask_timeout_ms: u64,
    pub retry_strategy: RetryStrategy,
    /// Retries after the first attempt; ignored for `off`
    pub retry_attempts: u32,
    pub fixed_delay_ms: u64,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    /// Deadline of the whole ask across all attempts and delays; derived
    /// from the per-attempt timeout and the retry schedule when unset
    pub overall_timeout_ms: Option<u64>,
}

impl Default for AskWithRetryConfig {
    fn default() -> Self {
        Self {
            ask_timeout_ms: 5_000,
            retry_strategy: RetryStrategy::BackoffDelay,
            retry_attempts: 3,
            fixed_delay_ms: 500,
            backoff_min_ms: 100,
            backoff_max_ms: 5_000,
            overall_timeout_ms: None,
        }
    }
}

impl AskWithRetryConfig {
    /// Single attempt with the given timeout
    pub fn no_retry(ask_timeout: Duration) -> Self {
        Self {
            ask_timeout_ms: duration_ms(ask_timeout),
            retry_strategy: RetryStrategy::Off,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: RetryStrategy, retry_attempts: u32) -> Self {
        self.retry_strategy = strategy;
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }

    /// Deadline of a whole [`ask_with_retry`](crate::ask_with_retry) call.
    ///
    /// Unless configured, this is the worst case of the schedule: every
    /// attempt timing out plus the longest delay before each retry.
    pub fn overall_timeout(&self) -> Duration {
        if let Some(ms) = self.overall_timeout_ms {
            return Duration::from_millis(ms);
        }
        let retries = u64::from(self.effective_retries());
        let delay_ms = match self.retry_strategy {
            RetryStrategy::Off | RetryStrategy::NoDelay => 0,
            RetryStrategy::FixedDelay => self.fixed_delay_ms,
            // backoff jitter adds at most a quarter of the cap
            RetryStrategy::BackoffDelay => self.backoff_max_ms.saturating_add(self.backoff_max_ms / 4),
        };
        let total = self
            .ask_timeout_ms
            .saturating_mul(retries + 1)
            .saturating_add(delay_ms.saturating_mul(retries));
        Duration::from_millis(total)
    }

    /// Number of retries actually performed after the first attempt
    pub fn effective_retries(&self) -> u32 {
        match self.retry_strategy {
            RetryStrategy::Off => 0,
            _ => self.retry_attempts,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ask_timeout_ms == 0 {
            return Err(EnforcementError::config(
                "ask-with-retry.ask-timeout-ms must be greater than 0",
            ));
        }
        if self.overall_timeout_ms == Some(0) {
            return Err(EnforcementError::config(
                "ask-with-retry.overall-timeout-ms must be greater than 0",
            ));
        }
        if self.retry_strategy == RetryStrategy::BackoffDelay {
            if self.backoff_min_ms == 0 {
                return Err(EnforcementError::config(
                    "ask-with-retry.backoff-min-ms must be greater than 0",
                ));
            }
            if self.backoff_min_ms > self.backoff_max_ms {
                return Err(EnforcementError::config(format!(
                    "ask-with-retry.backoff-min-ms ({}) exceeds backoff-max-ms ({})",
                    self.backoff_min_ms, self.backoff_max_ms
                )));
            }
        }
        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
