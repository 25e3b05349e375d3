//! Retry decisions with exponential backoff or minute-boundary waits.

use std::time::Duration;

use time::OffsetDateTime;

use crate::config::Config;
use crate::error::ApiError;

const NANOS_PER_MINUTE: i128 = 60_000_000_000;

/// Wait applied before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`. With `jitter` the wait is
    /// drawn uniformly from 50% to 150% of that.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
    /// Sleeps until the next wall-clock minute, when the remote quota resets.
    NextMinute,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(1_000),
            factor: 2.0,
            max: Duration::from_secs(5),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Wait before retry number `attempt`, counted from zero.
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64()).max(0.0);

                let mut delay = Duration::from_secs_f64(capped_seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
            Self::NextMinute => until_next_minute(OffsetDateTime::now_utc()),
        }
    }
}

/// Time left until the next wall-clock minute boundary after `now`.
///
/// Exactly on a boundary this is a full minute.
pub fn until_next_minute(now: OffsetDateTime) -> Duration {
    let into_minute = now.unix_timestamp_nanos().rem_euclid(NANOS_PER_MINUTE);
    let remaining = NANOS_PER_MINUTE - into_minute;
    Duration::from_nanos(remaining as u64)
}

/// Outcome of a retry evaluation for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub wait: Duration,
}

impl RetryDecision {
    pub const fn stop() -> Self {
        Self {
            should_retry: false,
            wait: Duration::ZERO,
        }
    }

    pub const fn retry_after(wait: Duration) -> Self {
        Self {
            should_retry: true,
            wait,
        }
    }
}

/// Decides whether a failed call is attempted again and how long to wait.
///
/// Only transport failures flagged retryable and rate limiting (HTTP 429 or
/// the 526 envelope code) are retried. Authentication, parameter and other
/// business errors surface on first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Backoff applied to transport failures.
    pub backoff: Backoff,
    /// Backoff applied to rate limiting.
    pub rate_limit_backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
            rate_limit_backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        let backoff = Backoff::Exponential {
            base: config.retry_min_wait(),
            factor: 2.0,
            max: config.retry_max_wait(),
            jitter: false,
        };
        Self {
            max_retries: config.retry_count,
            backoff,
            rate_limit_backoff: if config.force_hard_wait {
                Backoff::NextMinute
            } else {
                backoff
            },
        }
    }

    /// Same backoff for every failure kind.
    pub fn uniform(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            rate_limit_backoff: backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `failures` counts the failed attempts before this one.
    pub fn decide(&self, failures: u32, error: &ApiError) -> RetryDecision {
        if failures >= self.max_retries || !error.is_retryable() {
            return RetryDecision::stop();
        }

        let wait = match error {
            ApiError::RateLimited { .. } => self.rate_limit_backoff.delay(failures),
            _ => self.backoff.delay(failures),
        };
        RetryDecision::retry_after(wait)
    }
}
