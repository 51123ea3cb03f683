//! Configuration for retry behavior.

use capbridge_core::{Error, LocatorSettings, PublisherSettings};
use std::sync::Arc;
use std::time::Duration;

/// Default maximum number of attempts
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (500ms)
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default maximum delay for exponential backoff (4s)
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(4);

/// Shape of the pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same pause after every failure
    Fixed,
    /// `base * 2^attempt`, capped at the maximum delay
    Exponential,
}

/// Which errors should trigger a retry
#[derive(Clone)]
pub enum RetryOn {
    /// Retry on all errors
    All,
    /// Retry only on errors classified as transient
    Transient,
    /// Custom retry predicate
    Custom(Arc<dyn Fn(&Error) -> bool + Send + Sync>),
}

impl std::fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryOn::All => write!(f, "RetryOn::All"),
            RetryOn::Transient => write!(f, "RetryOn::Transient"),
            RetryOn::Custom(_) => write!(f, "RetryOn::Custom(<predicate>)"),
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Jitter factor for randomization (0.0 to 1.0)
    pub jitter_factor: f64,
    pub retry_on: RetryOn,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff: Backoff::Exponential,
            jitter_factor: 0.0,
            retry_on: RetryOn::Transient,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff retrying every error
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff: Backoff::Exponential,
            jitter_factor: 0.0,
            retry_on: RetryOn::All,
        }
    }

    /// A constant pause between attempts, retrying every error
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
            jitter_factor: 0.0,
            retry_on: RetryOn::All,
        }
    }

    /// Policy used to resolve the broker handle
    pub fn for_locator(settings: &LocatorSettings) -> Self {
        Self::exponential(settings.attempts, settings.base_delay(), settings.max_delay())
    }

    /// Policy used to publish the broker handle
    pub fn for_publisher(settings: &PublisherSettings) -> Self {
        Self::fixed(settings.attempts, settings.retry_delay())
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Check if an error should be retried
    pub fn should_retry(&self, error: &Error) -> bool {
        match &self.retry_on {
            RetryOn::All => true,
            RetryOn::Transient => error.is_transient(),
            RetryOn::Custom(predicate) => predicate(error),
        }
    }

    /// Delay to wait after the failed attempt with zero-based index `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let raw = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self
                .base_delay
                .checked_mul(2u32.saturating_pow(attempt))
                .unwrap_or(self.max_delay),
        };
        let capped = raw.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let jitter_range = capped.as_millis() as f64 * self.jitter_factor;
            let normalized = (fastrand::f64() - 0.5) * 2.0;
            let final_millis = (capped.as_millis() as f64 + normalized * jitter_range).max(0.0);
            Duration::from_millis(final_millis as u64)
        } else {
            capped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_and_caps() {
        let config = RetryConfig::exponential(5, Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(config.calculate_delay(0), Duration::from_millis(500));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(3));
        assert_eq!(config.calculate_delay(40), Duration::from_secs(3));
    }

    #[test]
    fn test_fixed_is_constant() {
        let config = RetryConfig::fixed(3, Duration::from_secs(1));
        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::fixed(3, Duration::from_millis(400)).with_jitter(0.5);
        for _ in 0..50 {
            let delay = config.calculate_delay(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_transient_filter() {
        let config = RetryConfig::default();
        assert!(config.should_retry(&Error::service_unavailable("activity")));
        assert!(!config.should_retry(&Error::configuration("bad tag")));
    }

    #[test]
    fn test_policies_from_settings() {
        let locator = RetryConfig::for_locator(&LocatorSettings::default());
        assert_eq!(locator.max_attempts, 3);
        assert_eq!(locator.backoff, Backoff::Exponential);
        assert_eq!(locator.calculate_delay(0), Duration::from_millis(500));

        let publisher = RetryConfig::for_publisher(&PublisherSettings::default());
        assert_eq!(publisher.max_attempts, 3);
        assert_eq!(publisher.backoff, Backoff::Fixed);
        assert_eq!(publisher.calculate_delay(1), Duration::from_secs(1));
    }
}
