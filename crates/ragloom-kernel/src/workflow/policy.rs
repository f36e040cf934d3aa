//! Per-step retry policy.
//!
//! Retries wrap a single handler invocation, never a whole run. The delay
//! before retry `n` (0-based) is `min(initial_delay * multiplier^n, max_delay)`.
//!
//! ```rust,ignore
//! use ragloom_kernel::workflow::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3)
//!     .with_initial_delay(Duration::from_millis(50))
//!     .with_retry_on(|err| err.is_retryable());
//! ```

use crate::settings::RetrySettings;
use crate::error::KernelError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type RetryPredicate = Arc<dyn Fn(&KernelError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    retry_on: RetryPredicate,
}

impl RetryPolicy {
    /// Policy with `max_retries` retries and the default backoff
    /// (100ms doubling up to 10s), retrying transient errors only.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            retry_on: Arc::new(KernelError::is_retryable),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_retries)
            .with_initial_delay(Duration::from_millis(settings.initial_delay_ms))
            .with_max_delay(Duration::from_millis(settings.max_delay_ms))
            .with_multiplier(settings.multiplier)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&KernelError) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// Whether `err` may be retried after `attempt` failed attempts (1-based).
    pub fn should_retry(&self, attempt: u32, err: &KernelError) -> bool {
        attempt <= self.max_retries && (self.retry_on)(err)
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let nanos = (self.initial_delay.as_nanos() as f64 * factor).round();
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_multiplier(2.0);

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn default_predicate_retries_transient_errors_only() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(1, &KernelError::llm_failed("503")));
        assert!(policy.should_retry(2, &KernelError::timeout(10)));
        assert!(!policy.should_retry(3, &KernelError::llm_failed("503")));
        assert!(!policy.should_retry(1, &KernelError::ConfigInvalid("bad".into())));
    }

    #[test]
    fn custom_predicate() {
        let policy = RetryPolicy::new(1).with_retry_on(|_| true);
        assert!(policy.should_retry(1, &KernelError::Cancelled));
        assert!(!RetryPolicy::none().should_retry(1, &KernelError::llm_failed("x")));
    }

    #[test]
    fn from_settings() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_retries: 4,
            initial_delay_ms: 10,
            max_delay_ms: 40,
            multiplier: 3.0,
        });
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.delay_for(1), Duration::from_millis(30));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
    }
}
