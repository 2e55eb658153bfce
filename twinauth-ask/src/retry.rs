//! Retry delay schedules

use crate::config::{AskWithRetryConfig, RetryStrategy};
use std::time::Duration;

/// Exponential backoff with up to 25% jitter, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    min_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min_ms: u64::try_from(min.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            attempt: 0,
        }
    }

    /// Delay before the next retry; doubles on every call until capped.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .min_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_ms);
        let jitter = rand::random::<u64>() % (capped / 4 + 1);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped.saturating_add(jitter))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Remaining retries of one ask and the delay before each
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    remaining: u32,
    delay: Delay,
}

#[derive(Debug, Clone)]
enum Delay {
    None,
    Fixed(Duration),
    Backoff(Backoff),
}

impl RetrySchedule {
    pub fn new(config: &AskWithRetryConfig) -> Self {
        let delay = match config.retry_strategy {
            RetryStrategy::Off | RetryStrategy::NoDelay => Delay::None,
            RetryStrategy::FixedDelay => Delay::Fixed(Duration::from_millis(config.fixed_delay_ms)),
            RetryStrategy::BackoffDelay => Delay::Backoff(Backoff::new(
                Duration::from_millis(config.backoff_min_ms),
                Duration::from_millis(config.backoff_max_ms),
            )),
        };
        Self {
            remaining: config.effective_retries(),
            delay,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(match &mut self.delay {
            Delay::None => Duration::ZERO,
            Delay::Fixed(d) => *d,
            Delay::Backoff(backoff) => backoff.next_delay(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let d1 = backoff.next_delay();
        let d2 = backoff.next_delay();
        assert!(d1.as_millis() >= 100 && d1.as_millis() <= 125);
        assert!(d2.as_millis() >= 200);

        for _ in 0..70 {
            // jitter adds at most a quarter of the cap
            assert!(backoff.next_delay().as_millis() <= 625);
        }

        backoff.reset();
        assert!(backoff.next_delay().as_millis() < 200);
    }

    #[test]
    fn test_schedule_counts_retries() {
        let config = AskWithRetryConfig {
            retry_strategy: RetryStrategy::FixedDelay,
            retry_attempts: 2,
            fixed_delay_ms: 40,
            ..Default::default()
        };
        let mut schedule = RetrySchedule::new(&config);
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(schedule.next_delay(), None);
    }

    #[test]
    fn test_off_schedule_is_empty() {
        let config = AskWithRetryConfig::default().with_strategy(RetryStrategy::Off, 9);
        assert_eq!(RetrySchedule::new(&config).next_delay(), None);

        let config = AskWithRetryConfig::default().with_strategy(RetryStrategy::NoDelay, 1);
        let mut schedule = RetrySchedule::new(&config);
        assert_eq!(schedule.next_delay(), Some(Duration::ZERO));
        assert_eq!(schedule.remaining(), 0);
    }
}
