//! Exponential backoff for broker reconnection.
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! Once the delay saturates at `max` the schedule keeps returning `max`. It
//! only gives up when an explicit attempt cap is set, so a long broker outage
//! is ridden out at the capped delay.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use pollbee_mqtt::backoff::Backoff;
//!
//! let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4), 2.0);
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
//!
//! // Connection succeeded.
//! backoff.reset();
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
//! ```

use std::time::Duration;

use thiserror::Error;

use super::config::Config;

/// Backoff exhaustion.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// The explicit attempt cap was reached. Carries the cap.
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Reconnection delay schedule. Not shared between tasks; the connection kernel
/// owns its instance.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
    /// `None` retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Unlimited schedule starting at `initial` and capped at `max`.
    ///
    /// A `multiplier` of `1.0` or less keeps the delay at `initial`.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            current: initial,
            max,
            multiplier,
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Schedule described by the reconnect section of the broker config.
    ///
    /// `max_reconnect_attempts = None` retries indefinitely.
    pub fn from_config(config: &Config) -> Self {
        let mut backoff = Self::new(
            Duration::from_secs(config.reconnect_delay),
            Duration::from_secs(config.max_reconnect_delay),
            config.reconnect_multiplier,
        );
        backoff.max_attempts = config.max_reconnect_attempts;
        backoff
    }

    /// Gives up after `max` attempts since the last reset.
    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = Some(max);
    }

    /// Back to the initial delay; called on every successful CONNACK.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }

    /// Delay to wait before the next attempt, advancing the schedule.
    ///
    /// # Errors
    ///
    /// [`BackoffError::MaxAttemptLimitError`] once more attempts were requested
    /// than the explicit cap allows. Never fails without a cap.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt = self.attempt.saturating_add(1);
        if let Some(limit) = self.max_attempts {
            if self.attempt > limit {
                return Err(BackoffError::MaxAttemptLimitError(limit));
            }
        }

        let sleep = self.current;
        if self.multiplier > 1.0 {
            self.current = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier)
                .min(self.max);
        }
        Ok(sleep)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for Backoff {
    /// 1s initial, 60s cap, +10% per attempt, no attempt cap.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 1.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_is_initial() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
        let second = backoff.next_sleep().unwrap();
        assert!(second > Duration::from_secs(1));
        assert!(second < Duration::from_secs_f64(1.2));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        backoff.set_max_attempts(20);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_sleep().ok()).collect();
        assert_eq!(delays.len(), 20);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::default();
        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_exhaustion_reports_limit() {
        let mut backoff = Backoff::default();
        backoff.set_max_attempts(2);
        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        match backoff.next_sleep() {
            Err(BackoffError::MaxAttemptLimitError(limit)) => assert_eq!(limit, 2),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_unlimited_by_default() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.max_attempts(), None);
        for _ in 0..1_000 {
            assert!(backoff.next_sleep().unwrap() <= Duration::from_secs(60));
        }
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_flat_multiplier_keeps_retrying() {
        let config = Config {
            reconnect_delay: 1,
            max_reconnect_delay: 10,
            reconnect_multiplier: 1.0,
            ..Default::default()
        };
        let mut backoff = Backoff::from_config(&config);
        for _ in 0..100 {
            assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_from_config_applies_explicit_cap() {
        let config = Config {
            reconnect_delay: 2,
            max_reconnect_delay: 30,
            reconnect_multiplier: 2.0,
            max_reconnect_attempts: Some(3),
            ..Default::default()
        };
        let mut backoff = Backoff::from_config(&config);
        assert_eq!(backoff.max_attempts(), Some(3));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(4));
    }
}
