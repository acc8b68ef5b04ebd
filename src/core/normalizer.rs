//! Converts a caller-supplied [`TaskRequest`] into a persistable [`TaskSpec`].

use std::time::Duration;

use super::error::SchedulerError;
use super::registry::PayloadRegistry;
use super::task::{BackoffPolicy, Preconditions, ScheduleType, TaskSpec};
use super::work::TaskPayload;
use crate::config::SchedulerConfig;
use crate::util::clock::duration_to_ms;
use crate::util::serde::Priority;

/// When a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run once after `initial_delay`.
    OneTime {
        /// Delay before the first run.
        initial_delay: Duration,
    },
    /// Run every `interval`, anywhere in the trailing `flex` window.
    Periodic {
        /// Repeat period.
        interval: Duration,
        /// Window before the end of each period in which the run may happen.
        flex: Duration,
        /// Delay before the first run.
        initial_delay: Duration,
    },
}

/// Caller-side retry policy. Unset fields fall back to [`SchedulerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RetryPolicy {
    /// Delay formula.
    pub policy: BackoffPolicy,
    /// Base delay.
    pub delay: Option<Duration>,
    /// Exponential multiplier.
    pub multiplier: Option<f64>,
    /// Jitter fraction in `[0, 1]`.
    pub jitter_factor: f64,
    /// Retries after the first attempt, capped at the configured ceiling.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Linear backoff with a fixed base delay.
    pub const fn linear(delay: Duration) -> Self {
        Self {
            policy: BackoffPolicy::Linear,
            delay: Some(delay),
            multiplier: None,
            jitter_factor: 0.0,
            max_retries: None,
        }
    }

    /// Exponential backoff.
    pub const fn exponential(delay: Duration, multiplier: f64, jitter_factor: f64) -> Self {
        Self {
            policy: BackoffPolicy::Exponential,
            delay: Some(delay),
            multiplier: Some(multiplier),
            jitter_factor,
            max_retries: None,
        }
    }
}

/// A unit of deferred work as described by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest<P> {
    /// Payload handed to the worker.
    pub payload: P,
    /// When to run.
    pub schedule: Schedule,
    /// Scheduling hint.
    pub priority: Priority,
    /// Advisory platform conditions.
    pub preconditions: Preconditions,
    /// Retry policy.
    pub retry: RetryPolicy,
}

impl<P: TaskPayload> TaskRequest<P> {
    /// Run `payload` once, immediately.
    pub fn one_time(payload: P) -> Self {
        Self {
            payload,
            schedule: Schedule::OneTime {
                initial_delay: Duration::ZERO,
            },
            priority: Priority::default(),
            preconditions: Preconditions::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Run `payload` every `interval` with the given flex window.
    pub fn periodic(payload: P, interval: Duration, flex: Duration) -> Self {
        Self {
            schedule: Schedule::Periodic {
                interval,
                flex,
                initial_delay: Duration::ZERO,
            },
            ..Self::one_time(payload)
        }
    }

    /// Delay the first run.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        match &mut self.schedule {
            Schedule::OneTime { initial_delay } | Schedule::Periodic { initial_delay, .. } => {
                *initial_delay = delay;
            }
        }
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set platform preconditions.
    #[must_use]
    pub fn with_preconditions(mut self, preconditions: Preconditions) -> Self {
        self.preconditions = preconditions;
        self
    }

    /// Replace the retry policy, keeping an already-set retry limit.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        let max_retries = retry.max_retries.or(self.retry.max_retries);
        self.retry = RetryPolicy { max_retries, ..retry };
        self
    }

    /// Limit retries after the first attempt.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = Some(max_retries);
        self
    }
}

/// Normalizer output: the spec to persist and its first run time.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// Persistable description.
    pub spec: TaskSpec,
    /// `now_ms + initial_delay_ms`.
    pub next_run_time_ms: u64,
}

/// Normalize `request` against `config`. Performs no I/O.
///
/// # Errors
/// [`SchedulerError::InvalidRequest`] for inconsistent schedules or retry
/// parameters, [`SchedulerError::Registry`] if the payload cannot be
/// serialized.
pub fn normalize<P: TaskPayload>(
    request: &TaskRequest<P>,
    registry: &PayloadRegistry,
    now_ms: u64,
    config: &SchedulerConfig,
) -> Result<NormalizedRecord, SchedulerError> {
    let (schedule_type, initial_delay, interval, flex) = match request.schedule {
        Schedule::OneTime { initial_delay } => {
            (ScheduleType::OneTime, initial_delay, Duration::ZERO, Duration::ZERO)
        }
        Schedule::Periodic {
            interval,
            flex,
            initial_delay,
        } => {
            if interval.is_zero() {
                return Err(SchedulerError::InvalidRequest(
                    "periodic interval must be greater than zero".into(),
                ));
            }
            if flex > interval {
                return Err(SchedulerError::InvalidRequest(format!(
                    "flex ({flex:?}) must not exceed interval ({interval:?})"
                )));
            }
            (ScheduleType::Periodic, initial_delay, interval, flex)
        }
    };

    let retry = &request.retry;
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return Err(SchedulerError::InvalidRequest(format!(
            "jitter factor {} outside [0, 1]",
            retry.jitter_factor
        )));
    }
    let multiplier = match (retry.policy, retry.multiplier) {
        (BackoffPolicy::Exponential, Some(m)) if !m.is_finite() || m <= 0.0 => {
            return Err(SchedulerError::InvalidRequest(format!(
                "backoff multiplier {m} must be a positive number"
            )));
        }
        (BackoffPolicy::Exponential, m) => Some(m.unwrap_or(config.default_backoff_multiplier)),
        (BackoffPolicy::Linear, _) => None,
    };

    let serialized = registry.serialize(&request.payload)?;
    let initial_delay_ms = duration_to_ms(initial_delay);

    let spec = TaskSpec {
        payload_type_id: serialized.type_id,
        payload_data: serialized.data,
        priority: request.priority.ordinal(),
        preconditions: request.preconditions,
        schedule_type,
        initial_delay_ms,
        interval_ms: duration_to_ms(interval),
        flex_ms: duration_to_ms(flex),
        backoff_policy: retry.policy,
        backoff_delay_ms: retry
            .delay
            .map_or(config.default_backoff_delay_ms, duration_to_ms),
        backoff_multiplier: multiplier,
        backoff_jitter_factor: match retry.policy {
            BackoffPolicy::Exponential => retry.jitter_factor,
            BackoffPolicy::Linear => 0.0,
        },
        max_retries: retry
            .max_retries
            .unwrap_or(config.default_max_retries)
            .min(config.max_retries_ceiling),
    };

    Ok(NormalizedRecord {
        spec,
        next_run_time_ms: now_ms.saturating_add(initial_delay_ms),
    })
}
