//! Redelivery parameters and delay computation.
//!
//! A [`RedeliveryPolicy`] is an immutable value describing how many times a
//! failed exchange is redelivered and how long to wait between attempts.
//! Specialised policies are derived from a parent by applying
//! [`RedeliveryOverrides`].

mod level;
mod overrides;
mod pattern;
mod policy;

pub use level::LoggingLevel;
pub use overrides::RedeliveryOverrides;
pub use pattern::DelayPattern;
pub use policy::{
    DEFAULT_BACK_OFF_MULTIPLIER,
    DEFAULT_COLLISION_AVOIDANCE_FACTOR,
    DEFAULT_MAXIMUM_REDELIVERY_DELAY,
    DEFAULT_REDELIVERY_DELAY,
    RedeliveryPolicy,
};

#[cfg(test)]
mod tests;
