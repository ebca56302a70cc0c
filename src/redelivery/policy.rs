//! The redelivery policy value object and its delay algorithm.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{DelayPattern, LoggingLevel};
use crate::error::ConfigError;

/// Default wait before a redelivery.
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_millis(1000);
/// Default upper bound on any computed delay.
pub const DEFAULT_MAXIMUM_REDELIVERY_DELAY: Duration = Duration::from_secs(60);
/// Default exponential back-off multiplier.
pub const DEFAULT_BACK_OFF_MULTIPLIER: f64 = 2.0;
/// Default collision avoidance factor (15%).
pub const DEFAULT_COLLISION_AVOIDANCE_FACTOR: f64 = 0.15;

/// How often, and how far apart, a failed exchange is redelivered.
///
/// The default policy performs no redeliveries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use redelivery::redelivery::RedeliveryPolicy;
///
/// let policy = RedeliveryPolicy::default()
///     .maximum_redeliveries(3)
///     .redelivery_delay(Duration::from_millis(100))
///     .use_exponential_back_off(true)
///     .back_off_multiplier(3.0);
///
/// assert_eq!(policy.compute_delay(1), Duration::from_millis(100));
/// assert_eq!(policy.compute_delay(3), Duration::from_millis(900));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeliveryPolicy {
    /// Redeliveries allowed per episode. Negative means unlimited.
    ///
    /// Default: 0.
    pub maximum_redeliveries: i32,

    /// Base wait between attempts.
    ///
    /// Default: 1 second.
    #[serde(with = "millis")]
    pub redelivery_delay: Duration,

    /// Cap applied to every computed delay. Zero disables the cap.
    ///
    /// Default: 60 seconds.
    #[serde(with = "millis")]
    pub maximum_redelivery_delay: Duration,

    /// Wait on the shared scheduler instead of the caller's task.
    ///
    /// Default: false.
    pub async_delayed_redelivery: bool,

    /// Growth factor applied per attempt when exponential back-off is on.
    ///
    /// Default: 2.0.
    pub back_off_multiplier: f64,

    /// Grow the delay geometrically with each attempt.
    ///
    /// Default: false.
    pub use_exponential_back_off: bool,

    /// Width of the random jitter band, in `(0, 1)`.
    ///
    /// Default: 0.15.
    pub collision_avoidance_factor: f64,

    /// Apply random jitter to each delay.
    ///
    /// Default: false.
    pub use_collision_avoidance: bool,

    /// Stepwise delays taking precedence over `redelivery_delay`.
    pub delay_pattern: Option<DelayPattern>,

    /// Keep redelivering while the owning handler is stopping.
    ///
    /// Default: true.
    pub allow_redelivery_while_stopping: bool,

    /// Level used when redeliveries are exhausted.
    ///
    /// Default: error.
    pub retries_exhausted_log_level: LoggingLevel,

    /// Level used for each redelivery attempt.
    ///
    /// Default: debug.
    pub retry_attempted_log_level: LoggingLevel,

    /// Log only every n-th redelivery attempt.
    ///
    /// Default: 1.
    pub retry_attempted_log_interval: u32,

    /// Log redelivery attempts at all.
    ///
    /// Default: true.
    pub log_retry_attempted: bool,

    /// Log exhaustion.
    ///
    /// Default: true.
    pub log_exhausted: bool,

    /// Log failures suppressed as handled.
    ///
    /// Default: false.
    pub log_handled: bool,

    /// Log failures suppressed as continued.
    ///
    /// Default: false.
    pub log_continued: bool,

    /// Include the failure's source chain when logging exhaustion.
    ///
    /// Default: true.
    pub log_stack_trace: bool,

    /// Include the failure's source chain when logging attempts.
    ///
    /// Default: false.
    pub log_retry_stack_trace: bool,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            maximum_redeliveries: 0,
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
            maximum_redelivery_delay: DEFAULT_MAXIMUM_REDELIVERY_DELAY,
            async_delayed_redelivery: false,
            back_off_multiplier: DEFAULT_BACK_OFF_MULTIPLIER,
            use_exponential_back_off: false,
            collision_avoidance_factor: DEFAULT_COLLISION_AVOIDANCE_FACTOR,
            use_collision_avoidance: false,
            delay_pattern: None,
            allow_redelivery_while_stopping: true,
            retries_exhausted_log_level: LoggingLevel::Error,
            retry_attempted_log_level: LoggingLevel::Debug,
            retry_attempted_log_interval: 1,
            log_retry_attempted: true,
            log_exhausted: true,
            log_handled: false,
            log_continued: false,
            log_stack_trace: true,
            log_retry_stack_trace: false,
        }
    }
}

impl RedeliveryPolicy {
    /// Set the redelivery budget. Negative values mean unlimited.
    #[must_use]
    pub fn maximum_redeliveries(mut self, count: i32) -> Self {
        self.maximum_redeliveries = count;
        self
    }

    /// Disable redelivery entirely.
    #[must_use]
    pub fn disable_redelivery(mut self) -> Self {
        self.maximum_redeliveries = 0;
        self
    }

    /// Set the base delay, raising a configured cap that would clip it.
    #[must_use]
    pub fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        if !self.maximum_redelivery_delay.is_zero() && self.maximum_redelivery_delay < delay {
            self.maximum_redelivery_delay = delay;
        }
        self
    }

    /// Set the delay cap. Zero disables it.
    #[must_use]
    pub fn maximum_redelivery_delay(mut self, cap: Duration) -> Self {
        self.maximum_redelivery_delay = cap;
        self
    }

    /// Wait on the shared scheduler.
    #[must_use]
    pub fn async_delayed_redelivery(mut self, enabled: bool) -> Self {
        self.async_delayed_redelivery = enabled;
        self
    }

    /// Set the exponential back-off multiplier.
    #[must_use]
    pub fn back_off_multiplier(mut self, multiplier: f64) -> Self {
        self.back_off_multiplier = multiplier;
        self
    }

    /// Toggle exponential back-off.
    #[must_use]
    pub fn use_exponential_back_off(mut self, enabled: bool) -> Self {
        self.use_exponential_back_off = enabled;
        self
    }

    /// Set the jitter band width.
    #[must_use]
    pub fn collision_avoidance_factor(mut self, factor: f64) -> Self {
        self.collision_avoidance_factor = factor;
        self
    }

    /// Set the jitter band width as a percentage.
    #[must_use]
    pub fn collision_avoidance_percent(self, percent: f64) -> Self {
        self.collision_avoidance_factor(percent / 100.0)
    }

    /// Toggle jitter.
    #[must_use]
    pub fn use_collision_avoidance(mut self, enabled: bool) -> Self {
        self.use_collision_avoidance = enabled;
        self
    }

    /// Install a stepwise delay pattern.
    #[must_use]
    pub fn delay_pattern(mut self, pattern: DelayPattern) -> Self {
        self.delay_pattern = Some(pattern);
        self
    }

    /// Allow or forbid redelivery while the handler is stopping.
    #[must_use]
    pub fn allow_redelivery_while_stopping(mut self, allowed: bool) -> Self {
        self.allow_redelivery_while_stopping = allowed;
        self
    }

    /// Set the level used when redeliveries are exhausted.
    #[must_use]
    pub fn retries_exhausted_log_level(mut self, level: LoggingLevel) -> Self {
        self.retries_exhausted_log_level = level;
        self
    }

    /// Set the level used for each redelivery attempt.
    #[must_use]
    pub fn retry_attempted_log_level(mut self, level: LoggingLevel) -> Self {
        self.retry_attempted_log_level = level;
        self
    }

    /// Log only every n-th attempt.
    #[must_use]
    pub fn retry_attempted_log_interval(mut self, interval: u32) -> Self {
        self.retry_attempted_log_interval = interval;
        self
    }

    /// Toggle attempt logging.
    #[must_use]
    pub fn log_retry_attempted(mut self, enabled: bool) -> Self {
        self.log_retry_attempted = enabled;
        self
    }

    /// Toggle exhaustion logging.
    #[must_use]
    pub fn log_exhausted(mut self, enabled: bool) -> Self {
        self.log_exhausted = enabled;
        self
    }

    /// Toggle logging of handled failures.
    #[must_use]
    pub fn log_handled(mut self, enabled: bool) -> Self {
        self.log_handled = enabled;
        self
    }

    /// Toggle logging of continued failures.
    #[must_use]
    pub fn log_continued(mut self, enabled: bool) -> Self {
        self.log_continued = enabled;
        self
    }

    /// Toggle source chains in exhaustion logs.
    #[must_use]
    pub fn log_stack_trace(mut self, enabled: bool) -> Self {
        self.log_stack_trace = enabled;
        self
    }

    /// Toggle source chains in attempt logs.
    #[must_use]
    pub fn log_retry_stack_trace(mut self, enabled: bool) -> Self {
        self.log_retry_stack_trace = enabled;
        self
    }

    /// Returns `true` if the policy never runs out of redeliveries.
    #[must_use]
    pub fn is_unlimited(&self) -> bool { self.maximum_redeliveries < 0 }

    /// Returns `true` once `attempts` redeliveries consume the budget.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        u32::try_from(self.maximum_redeliveries).is_ok_and(|max| attempts >= max)
    }

    /// Returns `true` if this attempt should be logged under the interval.
    #[must_use]
    pub fn should_log_attempt(&self, attempt: u32) -> bool {
        self.log_retry_attempted
            && self.retry_attempted_log_level.is_enabled()
            && attempt.is_multiple_of(self.retry_attempted_log_interval.max(1))
    }

    /// Check the numeric parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCollisionAvoidanceFactor`] when the
    /// jitter factor lies outside `(0, 1)`, or
    /// [`ConfigError::InvalidBackOffMultiplier`] when the multiplier is not a
    /// finite value of at least 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = self.collision_avoidance_factor;
        if !(f > 0.0 && f < 1.0) {
            return Err(ConfigError::InvalidCollisionAvoidanceFactor(f));
        }
        let m = self.back_off_multiplier;
        if !m.is_finite() || m < 1.0 {
            return Err(ConfigError::InvalidBackOffMultiplier(m));
        }
        Ok(())
    }

    /// Delay to wait before redelivery number `attempt` (1-based).
    #[must_use]
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        self.compute_delay_with(attempt, &mut rand::rng())
    }

    /// [`compute_delay`](Self::compute_delay) with an explicit jitter source.
    pub fn compute_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = if self.use_exponential_back_off {
            let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
            millis_f64(self.redelivery_delay) * self.back_off_multiplier.powi(exponent)
        } else if let Some(pattern) = &self.delay_pattern {
            millis_f64(pattern.delay_for(attempt))
        } else {
            millis_f64(self.redelivery_delay)
        };

        let mut delay_ms = base_ms;
        if !self.maximum_redelivery_delay.is_zero() {
            delay_ms = delay_ms.min(millis_f64(self.maximum_redelivery_delay));
        }

        if self.use_collision_avoidance && delay_ms > 0.0 {
            let half = self.collision_avoidance_factor / 2.0;
            delay_ms *= rng.random_range((1.0 - half)..=(1.0 + half));
        }

        from_millis_f64(delay_ms)
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "delays beyond 2^52 ms are not meaningful"
)]
fn millis_f64(duration: Duration) -> f64 { duration.as_millis() as f64 }

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    reason = "value is clamped to the u64 range first"
)]
fn from_millis_f64(ms: f64) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        return Duration::ZERO;
    }
    if ms >= u64::MAX as f64 {
        return Duration::from_millis(u64::MAX);
    }
    Duration::from_millis(ms.round() as u64)
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
