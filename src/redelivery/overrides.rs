//! Partial redelivery settings layered over a parent policy.

use std::time::Duration;

use super::{DelayPattern, LoggingLevel, RedeliveryPolicy};

/// Optional overrides applied on top of a parent [`RedeliveryPolicy`].
///
/// Exception policies use this to specialise the handler's default policy
/// without restating every parameter.
///
/// ```
/// use std::time::Duration;
///
/// use redelivery::redelivery::{RedeliveryOverrides, RedeliveryPolicy};
///
/// let parent = RedeliveryPolicy::default().maximum_redeliveries(1);
/// let derived = RedeliveryOverrides::default()
///     .maximum_redeliveries(4)
///     .redelivery_delay(Duration::from_millis(250))
///     .apply(&parent);
///
/// assert_eq!(derived.maximum_redeliveries, 4);
/// assert_eq!(derived.redelivery_delay, Duration::from_millis(250));
/// assert_eq!(derived.back_off_multiplier, parent.back_off_multiplier);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RedeliveryOverrides {
    /// See [`RedeliveryPolicy::maximum_redeliveries`].
    pub maximum_redeliveries: Option<i32>,
    /// See [`RedeliveryPolicy::redelivery_delay`].
    pub redelivery_delay: Option<Duration>,
    /// See [`RedeliveryPolicy::maximum_redelivery_delay`].
    pub maximum_redelivery_delay: Option<Duration>,
    /// See [`RedeliveryPolicy::async_delayed_redelivery`].
    pub async_delayed_redelivery: Option<bool>,
    /// See [`RedeliveryPolicy::back_off_multiplier`].
    pub back_off_multiplier: Option<f64>,
    /// See [`RedeliveryPolicy::use_exponential_back_off`].
    pub use_exponential_back_off: Option<bool>,
    /// See [`RedeliveryPolicy::collision_avoidance_factor`].
    pub collision_avoidance_factor: Option<f64>,
    /// See [`RedeliveryPolicy::use_collision_avoidance`].
    pub use_collision_avoidance: Option<bool>,
    /// See [`RedeliveryPolicy::delay_pattern`].
    pub delay_pattern: Option<DelayPattern>,
    /// See [`RedeliveryPolicy::allow_redelivery_while_stopping`].
    pub allow_redelivery_while_stopping: Option<bool>,
    /// See [`RedeliveryPolicy::retries_exhausted_log_level`].
    pub retries_exhausted_log_level: Option<LoggingLevel>,
    /// See [`RedeliveryPolicy::retry_attempted_log_level`].
    pub retry_attempted_log_level: Option<LoggingLevel>,
    /// See [`RedeliveryPolicy::retry_attempted_log_interval`].
    pub retry_attempted_log_interval: Option<u32>,
    /// See [`RedeliveryPolicy::log_retry_attempted`].
    pub log_retry_attempted: Option<bool>,
    /// See [`RedeliveryPolicy::log_exhausted`].
    pub log_exhausted: Option<bool>,
    /// See [`RedeliveryPolicy::log_handled`].
    pub log_handled: Option<bool>,
    /// See [`RedeliveryPolicy::log_continued`].
    pub log_continued: Option<bool>,
    /// See [`RedeliveryPolicy::log_stack_trace`].
    pub log_stack_trace: Option<bool>,
    /// See [`RedeliveryPolicy::log_retry_stack_trace`].
    pub log_retry_stack_trace: Option<bool>,
    /// Force `maximum_redeliveries` to zero regardless of other settings.
    pub disable_redelivery: bool,
}

macro_rules! override_setters {
    ($($field:ident: $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Override `", stringify!($field), "`.")]
            #[must_use]
            pub fn $field(mut self, value: $ty) -> Self {
                self.$field = Some(value);
                self
            }
        )*
    };
}

impl RedeliveryOverrides {
    override_setters! {
        maximum_redeliveries: i32,
        redelivery_delay: Duration,
        maximum_redelivery_delay: Duration,
        async_delayed_redelivery: bool,
        back_off_multiplier: f64,
        use_exponential_back_off: bool,
        collision_avoidance_factor: f64,
        use_collision_avoidance: bool,
        delay_pattern: DelayPattern,
        allow_redelivery_while_stopping: bool,
        retries_exhausted_log_level: LoggingLevel,
        retry_attempted_log_level: LoggingLevel,
        retry_attempted_log_interval: u32,
        log_retry_attempted: bool,
        log_exhausted: bool,
        log_handled: bool,
        log_continued: bool,
        log_stack_trace: bool,
        log_retry_stack_trace: bool,
    }

    /// Force the derived policy to perform no redeliveries.
    #[must_use]
    pub fn disable_redelivery(mut self) -> Self {
        self.disable_redelivery = true;
        self
    }

    /// Returns `true` when no field is overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool { *self == Self::default() }

    /// Derive a policy from `parent`.
    #[must_use]
    pub fn apply(&self, parent: &RedeliveryPolicy) -> RedeliveryPolicy {
        let mut policy = parent.clone();
        if let Some(cap) = self.maximum_redelivery_delay {
            policy = policy.maximum_redelivery_delay(cap);
        }
        if let Some(delay) = self.redelivery_delay {
            policy = policy.redelivery_delay(delay);
        }
        if let Some(pattern) = &self.delay_pattern {
            policy = policy.delay_pattern(pattern.clone());
        }
        if let Some(max) = self.maximum_redeliveries {
            policy.maximum_redeliveries = max;
        }
        set(&mut policy.async_delayed_redelivery, self.async_delayed_redelivery);
        set(&mut policy.back_off_multiplier, self.back_off_multiplier);
        set(&mut policy.use_exponential_back_off, self.use_exponential_back_off);
        set(&mut policy.collision_avoidance_factor, self.collision_avoidance_factor);
        set(&mut policy.use_collision_avoidance, self.use_collision_avoidance);
        set(
            &mut policy.allow_redelivery_while_stopping,
            self.allow_redelivery_while_stopping,
        );
        set(
            &mut policy.retries_exhausted_log_level,
            self.retries_exhausted_log_level,
        );
        set(
            &mut policy.retry_attempted_log_level,
            self.retry_attempted_log_level,
        );
        set(
            &mut policy.retry_attempted_log_interval,
            self.retry_attempted_log_interval,
        );
        set(&mut policy.log_retry_attempted, self.log_retry_attempted);
        set(&mut policy.log_exhausted, self.log_exhausted);
        set(&mut policy.log_handled, self.log_handled);
        set(&mut policy.log_continued, self.log_continued);
        set(&mut policy.log_stack_trace, self.log_stack_trace);
        set(&mut policy.log_retry_stack_trace, self.log_retry_stack_trace);
        if self.disable_redelivery {
            policy = policy.disable_redelivery();
        }
        policy
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
