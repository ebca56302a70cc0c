//! Metric helpers for `redelivery`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the counter tracking redelivery attempts.
pub const REDELIVERIES_TOTAL: &str = "redelivery_attempts_total";
/// Name of the counter tracking finished episodes, labelled by outcome.
pub const EPISODES_TOTAL: &str = "redelivery_episodes_total";
/// Name of the counter tracking failed fallback deliveries.
pub const FALLBACK_FAILURES_TOTAL: &str = "redelivery_fallback_failures_total";
/// Name of the gauge tracking episodes waiting for a redelivery.
pub const PENDING_REDELIVERIES: &str = "redelivery_pending";

/// Terminal outcome of an episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A redelivery succeeded.
    Recovered,
    /// The failure was suppressed and routing continued.
    Continued,
    /// The failure was suppressed and routing stopped.
    Handled,
    /// The exchange went to the fallback destination.
    DeadLettered,
    /// The failure surfaced to the caller.
    Propagated,
}

impl Outcome {
    /// Label value used for this outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Outcome::Recovered => "recovered",
            Outcome::Continued => "continued",
            Outcome::Handled => "handled",
            Outcome::DeadLettered => "dead_lettered",
            Outcome::Propagated => "propagated",
        }
    }
}

/// Record a redelivery attempt on `route`.
pub fn inc_redeliveries(route: &str) {
    #[cfg(feature = "metrics")]
    counter!(REDELIVERIES_TOTAL, "route" => route.to_owned()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = route;
}

/// Record a finished episode.
pub fn inc_episodes(outcome: Outcome) {
    #[cfg(feature = "metrics")]
    counter!(EPISODES_TOTAL, "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record a failed fallback delivery.
pub fn inc_fallback_failures() {
    #[cfg(feature = "metrics")]
    counter!(FALLBACK_FAILURES_TOTAL).increment(1);
}

/// Increment the pending redeliveries gauge.
pub fn inc_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_REDELIVERIES).increment(1.0);
}

/// Decrement the pending redeliveries gauge.
pub fn dec_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_REDELIVERIES).decrement(1.0);
}
