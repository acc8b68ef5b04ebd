//! Retry/backoff engine: error classification and delay computation.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::task::{BackoffPolicy, TaskSpec};
use super::work::TaskError;

/// Hard ceiling for exponential delays in the reference policy (5 minutes).
pub const MAX_BACKOFF_MS: u64 = 300_000;

/// Multiplier used when an exponential spec leaves it unset.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Operational category of a work-unit error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity problems.
    Network,
    /// Throttled by a remote service.
    RateLimit,
    /// Timed out.
    Timeout,
    /// Remote service down or overloaded.
    ServiceUnavailable,
    /// Lock/resource held elsewhere.
    ResourceContention,
    /// Circuit breaker open.
    CircuitBreaker,
    /// Retry limit reached.
    MaxRetriesExceeded,
    /// Anything else.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ResourceContention => "resource_contention",
            Self::CircuitBreaker => "circuit_breaker",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Map an error to its category.
pub const fn classify(error: &TaskError) -> ErrorCategory {
    match error {
        TaskError::Network(_) => ErrorCategory::Network,
        TaskError::RateLimited { .. } => ErrorCategory::RateLimit,
        TaskError::Timeout(_) => ErrorCategory::Timeout,
        TaskError::ServiceUnavailable(_) => ErrorCategory::ServiceUnavailable,
        TaskError::ResourceContention(_) => ErrorCategory::ResourceContention,
        TaskError::CircuitOpen { .. } => ErrorCategory::CircuitBreaker,
        TaskError::MaxRetriesExceeded { .. } => ErrorCategory::MaxRetriesExceeded,
        TaskError::Permanent(_) | TaskError::Validation(_) | TaskError::Other(_) => {
            ErrorCategory::Unknown
        }
    }
}

/// Whether retrying could help. Unknown errors fail open toward retrying.
pub const fn is_retryable(error: &TaskError) -> bool {
    !matches!(
        error,
        TaskError::MaxRetriesExceeded { .. } | TaskError::Permanent(_) | TaskError::Validation(_)
    )
}

/// Base delay suggested by the error itself, replacing the configured base.
///
/// Rate limits carry a retry-after; open circuit breakers carry the time
/// they half-open, converted to a delay from `now_ms`.
pub const fn suggested_base_delay_ms(error: &TaskError, now_ms: u64) -> Option<u64> {
    match error {
        TaskError::RateLimited {
            retry_after_ms: Some(ms),
            ..
        } => Some(*ms),
        TaskError::CircuitOpen { open_until_ms, .. } => Some(open_until_ms.saturating_sub(now_ms)),
        _ => None,
    }
}

/// Parameters of one backoff computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Linear or exponential.
    pub policy: BackoffPolicy,
    /// Base delay.
    pub base_delay_ms: u64,
    /// Exponential multiplier; `None` means [`DEFAULT_BACKOFF_MULTIPLIER`].
    pub multiplier: Option<f64>,
    /// Jitter fraction, clamped to `[0, 1]`.
    pub jitter_factor: f64,
    /// Ceiling for exponential delays.
    pub max_delay_ms: u64,
}

impl Backoff {
    /// Backoff parameters of a persisted task.
    pub const fn from_spec(spec: &TaskSpec, max_delay_ms: u64) -> Self {
        Self {
            policy: spec.backoff_policy,
            base_delay_ms: spec.backoff_delay_ms,
            multiplier: spec.backoff_multiplier,
            jitter_factor: spec.backoff_jitter_factor,
            max_delay_ms,
        }
    }

    /// Replace the base delay (error-specific override).
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Delay before retry number `retry` (1-based), using the thread RNG.
    pub fn delay_for(&self, retry: u32) -> u64 {
        self.delay_for_with(&mut rand::rng(), retry)
    }

    /// Delay before retry number `retry` (1-based) with an explicit RNG.
    ///
    /// Linear delays are exactly `base * retry`. Exponential delays are
    /// `base * multiplier^(retry - 1)`, drawn uniformly from
    /// `[raw * (1 - f), raw * (1 + f)]` when jitter is set, then capped.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_for_with<R: Rng + ?Sized>(&self, rng: &mut R, retry: u32) -> u64 {
        match self.policy {
            BackoffPolicy::Linear => self.base_delay_ms.saturating_mul(u64::from(retry)),
            BackoffPolicy::Exponential => {
                let ceiling = self.max_delay_ms as f64;
                let multiplier = self.multiplier.unwrap_or(DEFAULT_BACKOFF_MULTIPLIER);
                let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
                let raw = self.base_delay_ms as f64 * multiplier.powi(exponent);
                if !raw.is_finite() {
                    return self.max_delay_ms;
                }

                let jitter = self.jitter_factor.clamp(0.0, 1.0);
                let delay = if jitter > 0.0 {
                    let low = raw * (1.0 - jitter);
                    if low >= ceiling {
                        return self.max_delay_ms;
                    }
                    rng.random_range(low..=raw * (1.0 + jitter))
                } else {
                    raw
                };
                delay.clamp(0.0, ceiling) as u64
            }
        }
    }
}

/// Spec-level entry point: delay for `attempt_count` under the reference
/// 5 minute ceiling.
pub fn calculate_delay(
    policy: BackoffPolicy,
    base_delay_ms: u64,
    multiplier: Option<f64>,
    jitter_factor: f64,
    attempt_count: u32,
) -> u64 {
    Backoff {
        policy,
        base_delay_ms,
        multiplier,
        jitter_factor,
        max_delay_ms: MAX_BACKOFF_MS,
    }
    .delay_for(attempt_count)
}

/// Next run time of a periodic task that just succeeded:
/// `now + interval - flex + uniform(0, flex)`.
pub fn periodic_next_run_with<R: Rng + ?Sized>(
    rng: &mut R,
    now_ms: u64,
    interval_ms: u64,
    flex_ms: u64,
) -> u64 {
    let flex = flex_ms.min(interval_ms);
    let offset = if flex == 0 { 0 } else { rng.random_range(0..=flex) };
    now_ms.saturating_add(interval_ms - flex).saturating_add(offset)
}
