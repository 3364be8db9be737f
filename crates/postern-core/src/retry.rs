//! Pure retry policy and backoff math.
//!
//! The policy maps (attempt count, response metadata, error) to a retry
//! decision without performing any I/O, so every branch is directly
//! testable. Exponential backoff and jitter for the polling loop live here
//! too; jitter is applied to the returned value only, never folded back
//! into the failure-derived base.

use crate::error::{is_retryable_status, Error};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Default delay applied when a retryable response carries no retry header.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_millis(500);
/// Lower clamp for rate-limit-style retry delays.
pub const MIN_RATE_LIMIT_DELAY: Duration = Duration::from_millis(100);
/// Upper clamp for rate-limit-style retry delays.
pub const MAX_RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);

/// Outcome of consulting a retry policy or retry-decider middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request, optionally after sleeping for the given delay.
    Retry {
        /// Delay to apply before the next attempt.
        after: Option<Duration>,
    },
    /// Propagate the error to the caller.
    DoNotRetry,
}

impl RetryDecision {
    /// Convenience constructor for an immediate retry.
    pub fn retry_now() -> Self {
        Self::Retry { after: None }
    }

    /// Convenience constructor for a delayed retry.
    pub fn retry_after(delay: Duration) -> Self {
        Self::Retry { after: Some(delay) }
    }
}

/// Retry-relevant metadata extracted from a received response.
///
/// Header values are carried raw; parsing happens inside the policy so the
/// whole decision stays a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub status: u16,
    /// Raw `Retry-After` header value, if present.
    pub retry_after: Option<String>,
    /// Raw `X-RateLimit-Reset` header value, if present.
    pub rate_limit_reset: Option<String>,
}

/// Configuration for the pipeline's default retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts for one logical request.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Default retry policy applied when no retry-decider middleware claims an
/// attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from explicit configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide whether the given attempt should be retried.
    ///
    /// `now` anchors HTTP-date parsing so the decision is reproducible.
    pub fn decide(
        &self,
        attempt: u32,
        response: Option<&ResponseMeta>,
        error: &Error,
        now: SystemTime,
    ) -> RetryDecision {
        if attempt >= self.config.max_attempts {
            return RetryDecision::DoNotRetry;
        }

        match error {
            Error::Transport { kind, .. } if kind.is_retryable() => {
                RetryDecision::retry_after(DEFAULT_RATE_LIMIT_DELAY)
            }
            Error::Api(_) | Error::UnexpectedResponse { .. } => {
                let status = error.status().unwrap_or(0);
                if !is_retryable_status(status) {
                    return RetryDecision::DoNotRetry;
                }
                let delay = response
                    .map(|meta| rate_limit_delay(meta, now))
                    .unwrap_or(DEFAULT_RATE_LIMIT_DELAY);
                RetryDecision::retry_after(delay)
            }
            _ => RetryDecision::DoNotRetry,
        }
    }
}

/// Compute the delay before retrying a rate-limited request.
///
/// Honors `Retry-After` first, then `X-RateLimit-Reset`; falls back to
/// [`DEFAULT_RATE_LIMIT_DELAY`] and clamps the result to
/// [[`MIN_RATE_LIMIT_DELAY`], [`MAX_RATE_LIMIT_DELAY`]].
pub fn rate_limit_delay(meta: &ResponseMeta, now: SystemTime) -> Duration {
    let parsed = meta
        .retry_after
        .as_deref()
        .and_then(|value| parse_retry_after(value, now))
        .or_else(|| {
            meta.rate_limit_reset
                .as_deref()
                .and_then(|value| parse_retry_after(value, now))
        })
        .unwrap_or(DEFAULT_RATE_LIMIT_DELAY);

    parsed.clamp(MIN_RATE_LIMIT_DELAY, MAX_RATE_LIMIT_DELAY)
}

/// Parse a retry header value as integer seconds or an HTTP-date.
///
/// Returns `None` when the value is unparseable; a date in the past maps to
/// a zero delay (which the caller clamps up).
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(fractional) = trimmed.parse::<f64>() {
        if fractional.is_finite() && fractional >= 0.0 {
            return Some(Duration::from_secs_f64(fractional));
        }
        return None;
    }
    let date = chrono::DateTime::parse_from_rfc2822(trimmed).ok()?;
    let target = SystemTime::UNIX_EPOCH + Duration::from_secs(date.timestamp().max(0) as u64);
    Some(target.duration_since(now).unwrap_or(Duration::ZERO))
}

/// Exponential backoff interval for a consecutive-failure count.
///
/// `min(base * 2^failures, max)`; saturates instead of overflowing for
/// absurd failure counts.
pub fn exponential_interval(base: Duration, failures: u32, max: Duration) -> Duration {
    let multiplier = 2u32.checked_pow(failures.min(31)).unwrap_or(u32::MAX);
    base.checked_mul(multiplier).unwrap_or(max).min(max)
}

/// Apply uniform ±20% jitter to an interval.
///
/// Only the applied value is perturbed; callers keep the un-jittered base
/// for the next backoff computation.
pub fn apply_jitter(interval: Duration, rng: &mut impl Rng) -> Duration {
    let factor: f64 = rng.gen_range(0.8..=1.2);
    interval.mul_f64(factor)
}
