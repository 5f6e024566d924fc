//! Pacing and retry constants plus the retry decision table

use std::time::Duration;

use shared::ApiFailure;

/// What the executor does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Rate limited: pause every caller of this remote system, then retry.
    /// Does not count towards `max_retries`.
    Pause(Duration),
    /// Transient failure: sleep, then retry
    Backoff(Duration),
    /// Non-retriable, or retries exhausted
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Minimum spacing between two dispatches to the same remote system
    pub min_interval: Duration,
    /// Retries allowed for 5xx and network failures after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Used when a 429 response carries no retry-after header
    pub default_retry_after: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_REQUESTS_PER_SECOND: u32 = 7;
    pub const DEFAULT_MAX_RETRIES: u32 = 4;
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
    pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

    pub fn new(max_requests_per_second: u32, max_retries: u32, base_delay: Duration, default_retry_after: Duration) -> Self {
        Self {
            min_interval: Self::interval_for_rate(max_requests_per_second),
            max_retries,
            base_delay,
            default_retry_after,
        }
    }

    /// No pacing and no sleeping; retry counts are unchanged
    pub fn immediate() -> Self {
        Self {
            min_interval: Duration::ZERO,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            base_delay: Duration::ZERO,
            default_retry_after: Duration::ZERO,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// ceil(1000 / rps) milliseconds; a zero rate disables pacing
    pub fn interval_for_rate(max_requests_per_second: u32) -> Duration {
        if max_requests_per_second == 0 {
            return Duration::ZERO;
        }
        let rps = u64::from(max_requests_per_second);
        Duration::from_millis((1000 + rps - 1) / rps)
    }

    /// Total dispatches for a request that keeps failing transiently
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `base * 2^(attempt - 1)` for a 1-based attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Decide how to react to `failure`, where `attempt` is the 1-based count of
    /// transient failures seen so far including this one
    pub fn decide(&self, failure: &ApiFailure, attempt: u32) -> RetryDecision {
        match failure {
            ApiFailure::RateLimited { retry_after } => {
                RetryDecision::Pause(retry_after.unwrap_or(self.default_retry_after))
            }
            ApiFailure::ServerError { .. } | ApiFailure::NetworkError(_) => {
                if attempt <= self.max_retries {
                    RetryDecision::Backoff(self.backoff_delay(attempt))
                } else {
                    RetryDecision::Fail
                }
            }
            ApiFailure::ClientError { .. }
            | ApiFailure::NotFound
            | ApiFailure::InvalidResponse(_)
            | ApiFailure::SafetyViolation { .. } => RetryDecision::Fail,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_REQUESTS_PER_SECOND,
            Self::DEFAULT_MAX_RETRIES,
            Duration::from_millis(Self::DEFAULT_BASE_DELAY_MS),
            Duration::from_secs(Self::DEFAULT_RETRY_AFTER_SECS),
        )
    }
}
